//! Core configuration with security-reviewed defaults.

use chrono::Duration;

const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_MINUTES: i64 = 30;
const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 20;
const DEFAULT_MAX_CONCURRENT_SESSIONS: u64 = 2;
const DEFAULT_SESSION_CACHE_TTL_SECONDS: u64 = 60;
const DEFAULT_PASSWORD_EXPIRY_DAYS: i64 = 90;
const DEFAULT_PASSWORD_HISTORY_SIZE: usize = 10;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 12;
const DEFAULT_SMS_CODE_TTL_MINUTES: i64 = 5;
const DEFAULT_SMS_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_VERIFY_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_VERIFY_LOCKOUT_MINUTES: i64 = 15;
const DEFAULT_TEMP_TOKEN_TTL_MINUTES: i64 = 10;
const DEFAULT_TOTP_ISSUER: &str = "Custos";

/// Configuration for the authentication core. Everything is injected; the
/// defaults reproduce production policy.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    max_failed_attempts: u32,
    lockout_duration: Duration,
    session_timeout: Duration,
    max_concurrent_sessions: u64,
    session_cache_ttl_seconds: u64,
    password_expiry_days: i64,
    password_history_size: usize,
    password_min_length: usize,
    sms_code_ttl: Duration,
    sms_max_attempts: u32,
    verify_lockout_threshold: u32,
    verify_lockout_duration: Duration,
    temp_token_ttl: Duration,
    totp_issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_duration: Duration::minutes(DEFAULT_LOCKOUT_MINUTES),
            session_timeout: Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINUTES),
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            session_cache_ttl_seconds: DEFAULT_SESSION_CACHE_TTL_SECONDS,
            password_expiry_days: DEFAULT_PASSWORD_EXPIRY_DAYS,
            password_history_size: DEFAULT_PASSWORD_HISTORY_SIZE,
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            sms_code_ttl: Duration::minutes(DEFAULT_SMS_CODE_TTL_MINUTES),
            sms_max_attempts: DEFAULT_SMS_MAX_ATTEMPTS,
            verify_lockout_threshold: DEFAULT_VERIFY_LOCKOUT_THRESHOLD,
            verify_lockout_duration: Duration::minutes(DEFAULT_VERIFY_LOCKOUT_MINUTES),
            temp_token_ttl: Duration::minutes(DEFAULT_TEMP_TOKEN_TTL_MINUTES),
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: u64) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    #[must_use]
    pub fn with_session_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_cache_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_expiry_days(mut self, days: i64) -> Self {
        self.password_expiry_days = days;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    #[must_use]
    pub fn max_concurrent_sessions(&self) -> u64 {
        self.max_concurrent_sessions
    }

    #[must_use]
    pub fn session_cache_ttl_seconds(&self) -> u64 {
        self.session_cache_ttl_seconds
    }

    #[must_use]
    pub fn password_expiry_days(&self) -> i64 {
        self.password_expiry_days
    }

    #[must_use]
    pub fn password_history_size(&self) -> usize {
        self.password_history_size
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn sms_code_ttl(&self) -> Duration {
        self.sms_code_ttl
    }

    #[must_use]
    pub fn sms_max_attempts(&self) -> u32 {
        self.sms_max_attempts
    }

    #[must_use]
    pub fn verify_lockout_threshold(&self) -> u32 {
        self.verify_lockout_threshold
    }

    #[must_use]
    pub fn verify_lockout_duration(&self) -> Duration {
        self.verify_lockout_duration
    }

    #[must_use]
    pub fn temp_token_ttl(&self) -> Duration {
        self.temp_token_ttl
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }
}
