//! In-memory store implementations.
//!
//! Suitable for single-process deployments and for the test suites. Each
//! store serializes access through one mutex, which gives the same row-level
//! atomicity the durable backends provide.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    FailedAttempt, KeyValueStore, NewSession, Session, SessionRepo, SmsSender, User, UserStore,
    UserUpdate,
};

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user record. Provisioning is outside the auth core, so this is
    /// an inherent method rather than part of the `UserStore` contract.
    pub async fn insert(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }

    /// Direct read-back for assertions.
    pub async fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }
}

fn apply_update(user: &mut User, update: UserUpdate) {
    if let Some(attempts) = update.failed_login_attempts {
        user.failed_login_attempts = attempts;
    }
    if let Some(locked_until) = update.account_locked_until {
        user.account_locked_until = locked_until;
    }
    if let Some(hash) = update.password_hash {
        user.password_hash = hash;
    }
    if let Some(changed_at) = update.password_changed_at {
        user.password_changed_at = changed_at;
    }
    if let Some(history) = update.password_history {
        user.password_history = history;
    }
    if let Some(must_change) = update.must_change_password {
        user.must_change_password = must_change;
    }
    if let Some(enabled) = update.mfa_enabled {
        user.mfa_enabled = enabled;
    }
    if let Some(secret) = update.mfa_secret {
        user.mfa_secret = secret;
    }
    if let Some(method) = update.mfa_method {
        user.mfa_method = method;
    }
    if let Some(codes) = update.mfa_backup_codes {
        user.mfa_backup_codes = codes;
    }
    if let Some(enabled_at) = update.mfa_enabled_at {
        user.mfa_enabled_at = enabled_at;
    }
    if let Some(last_login) = update.last_login_at {
        user.last_login_at = Some(last_login);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        // Exact, case-sensitive match by contract.
        let users = self.users.lock().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<()> {
        let mut users = self.users.lock().await;
        if let Some(user) = users.get_mut(&id) {
            apply_update(user, update);
        }
        Ok(())
    }

    async fn register_failed_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        lock_for: Duration,
    ) -> Result<FailedAttempt> {
        let mut users = self.users.lock().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(FailedAttempt {
                attempts: 0,
                locked_until: None,
            });
        };
        // Increment and lock under the same guard so racing failures
        // cannot lose an update.
        user.failed_login_attempts += 1;
        if user.failed_login_attempts >= threshold {
            user.account_locked_until = Some(Utc::now() + lock_for);
        }
        Ok(FailedAttempt {
            attempts: user.failed_login_attempts,
            locked_until: user.account_locked_until,
        })
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionRepo {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read-back for assertions.
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionRepo for MemorySessionRepo {
    async fn insert(&self, session: NewSession) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            token_hash: session.token_hash,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            is_active: true,
        };
        self.sessions
            .lock()
            .await
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_token_hash(&self, token_hash: &[u8]) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .find(|session| session.token_hash == token_hash)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn update_activity(
        &self,
        id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.last_activity = last_activity;
            session.expires_at = expires_at;
        }
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .filter(|session| {
                session.user_id == user_id && session.is_active && session.expires_at > now
            })
            .count() as u64)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().await;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|session| {
                session.user_id == user_id && session.is_active && session.expires_at > now
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(active)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.is_active && session.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        // Lazy expiry keeps the map bounded without a background sweep.
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: StdDuration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Records outbound messages instead of delivering them.
#[derive(Debug, Default)]
pub struct MemorySmsSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemorySmsSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far as `(to_number, body)` pairs.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SmsSender for MemorySmsSender {
    async fn send(&self, to_number: &str, body: &str) -> Result<bool> {
        self.sent
            .lock()
            .await
            .push((to_number.to_string(), body.to_string()));
        Ok(true)
    }
}
