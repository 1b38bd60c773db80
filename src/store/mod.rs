//! Collaborator seams: user records, session records, key/value cache, SMS.
//!
//! The core never talks to infrastructure directly; everything is injected
//! behind these traits so a distributed deployment can back them with shared
//! services and tests can run against the in-memory versions.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// Which second factor(s) a user has enrolled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MfaMethod {
    Totp,
    Sms,
    Both,
}

impl MfaMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "TOTP",
            Self::Sms => "SMS",
            Self::Both => "BOTH",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "TOTP" => Some(Self::Totp),
            "SMS" => Some(Self::Sms),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }

    /// TOTP-bearing methods require a stored seed.
    #[must_use]
    pub fn includes_totp(self) -> bool {
        matches!(self, Self::Totp | Self::Both)
    }
}

/// Auth-relevant subset of a user record.
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub failed_login_attempts: u32,
    pub account_locked_until: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    /// Past password hashes, newest first, at most 10.
    pub password_history: Vec<String>,
    pub must_change_password: bool,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<SecretString>,
    pub mfa_method: Option<MfaMethod>,
    /// SHA-256 digests of unused backup codes.
    pub mfa_backup_codes: Vec<String>,
    pub mfa_enabled_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub phone: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// A fresh, active user record with empty policy state. Account
    /// provisioning lives outside this core; this is the seam through which
    /// the host application (and the test suites) hand records to a store.
    #[must_use]
    pub fn new(email: &str, password_hash: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: password_hash.to_string(),
            failed_login_attempts: 0,
            account_locked_until: None,
            password_changed_at: Utc::now(),
            password_history: Vec::new(),
            must_change_password: false,
            mfa_enabled: false,
            mfa_secret: None,
            mfa_method: None,
            mfa_backup_codes: Vec::new(),
            mfa_enabled_at: None,
            is_active: true,
            roles: Vec::new(),
            phone: None,
            last_login_at: None,
        }
    }

    /// Whether the account lockout is currently in force.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.account_locked_until
            .is_some_and(|locked_until| locked_until > now)
    }
}

/// Partial update for a user row. `None` leaves the field unchanged;
/// for nullable columns, `Some(None)` clears the value.
#[derive(Debug, Default)]
pub struct UserUpdate {
    pub failed_login_attempts: Option<u32>,
    pub account_locked_until: Option<Option<DateTime<Utc>>>,
    pub password_hash: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_history: Option<Vec<String>>,
    pub must_change_password: Option<bool>,
    pub mfa_enabled: Option<bool>,
    pub mfa_secret: Option<Option<SecretString>>,
    pub mfa_method: Option<Option<MfaMethod>>,
    pub mfa_backup_codes: Option<Vec<String>>,
    pub mfa_enabled_at: Option<Option<DateTime<Utc>>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Outcome of an atomic failed-login registration.
#[derive(Clone, Copy, Debug)]
pub struct FailedAttempt {
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Durable user record store. Implementations must provide at least
/// single-row atomicity for `update` and `register_failed_attempt`.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Exact, case-sensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<()>;

    /// Atomically increment the failure counter, setting the lock timestamp
    /// when the new count reaches `threshold`. Two racing failures must not
    /// lose an increment.
    async fn register_failed_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        lock_for: Duration,
    ) -> Result<FailedAttempt>;
}

/// A session row. The raw bearer token is never stored, only its hash.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Fields for a new session row; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable session record store.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert(&self, session: NewSession) -> Result<Session>;

    async fn find_by_token_hash(&self, token_hash: &[u8]) -> Result<Option<Session>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    async fn update_activity(
        &self,
        id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Idempotent; deactivating an already-inactive session is a no-op.
    async fn deactivate(&self, id: Uuid) -> Result<()>;

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Sessions with `is_active` and an expiry in the future.
    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    /// Active, unexpired sessions ordered by `last_activity` descending.
    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Physically delete rows that are expired or inactive. Returns rows removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Generic key/value store with per-key TTL. Backs the session cache, the
/// pending-MFA markers, and the SMS/verification-lockout state so a
/// distributed deployment can share them across instances.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: StdDuration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Outbound SMS delivery; success/failure only.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to_number: &str, body: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::{MfaMethod, User};
    use chrono::{Duration, Utc};

    #[test]
    fn mfa_method_round_trip() {
        for method in [MfaMethod::Totp, MfaMethod::Sms, MfaMethod::Both] {
            assert_eq!(MfaMethod::from_str(method.as_str()), Some(method));
        }
        assert_eq!(MfaMethod::from_str("EMAIL"), None);
    }

    #[test]
    fn totp_bearing_methods() {
        assert!(MfaMethod::Totp.includes_totp());
        assert!(MfaMethod::Both.includes_totp());
        assert!(!MfaMethod::Sms.includes_totp());
    }

    #[test]
    fn lock_is_time_boxed() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", "hash");
        assert!(!user.is_locked_at(now));

        user.account_locked_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked_at(now));

        user.account_locked_until = Some(now - Duration::seconds(1));
        assert!(!user.is_locked_at(now));
    }
}
