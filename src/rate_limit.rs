//! Rate limiting primitives for auth flows.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Login,
    PasswordChange,
    MfaVerify,
}

impl RateLimitAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::PasswordChange => "password_change",
            Self::MfaVerify => "mfa_verify",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-process fixed-window limiter: at most `max_requests` per key per
/// window. Missing IPs are allowed through; proxies that strip the address
/// should be fixed at the edge, not punished here.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, key: String) -> RateLimitDecision {
        let now = Utc::now();
        let Ok(mut windows) = self.windows.lock() else {
            // Poisoned lock: fail closed.
            return RateLimitDecision::Limited;
        };
        windows.retain(|_, (started_at, _)| *started_at + self.window > now);

        let (started_at, count) = windows.entry(key).or_insert((now, 0));
        if *started_at + self.window <= now {
            *started_at = now;
            *count = 0;
        }
        *count += 1;
        if *count > self.max_requests {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check(format!("ip:{}:{}", action.as_str(), ip)),
            None => RateLimitDecision::Allowed,
        }
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(format!("email:{}:{}", action.as_str(), email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn fixed_window_limits_after_budget() {
        let limiter = FixedWindowRateLimiter::new(3, Duration::minutes(1));
        for _ in 0..3 {
            assert_eq!(
                limiter.check_email("user@example.com", RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        // A different key has its own budget.
        assert_eq!(
            limiter.check_email("other@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn actions_are_tracked_separately() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::minutes(1));
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::PasswordChange),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn missing_ip_is_allowed() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::minutes(1));
        for _ in 0..5 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::MfaVerify),
                RateLimitDecision::Allowed
            );
        }
    }
}
