//! Session lifecycle: creation, sliding-window validation, and termination.
//!
//! Raw bearer tokens exist only in transit; the durable rows and the cache
//! are keyed by SHA-256 hashes, so a store dump yields nothing replayable.
//! Validation reads through a short-TTL cache entry that snapshots the
//! session row, saving the token lookup on the hot path. Account flags are
//! read fresh on every validation, so an out-of-band lock or disable takes
//! effect immediately even on a cache hit; session-row staleness is bounded
//! by the TTL rather than by cross-instance invalidation.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLevel, AuditSink};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::store::{KeyValueStore, NewSession, Session, SessionRepo, UserStore};
use crate::token::{generate_token, hash_token, hash_token_hex};

/// A freshly created session plus the one-time view of its raw token.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub token: String,
    pub session: Session,
}

/// Cache snapshot of a session row, keyed by the token hash.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSession {
    session_id: Uuid,
    user_id: Uuid,
    token_hash: Vec<u8>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
}

impl CachedSession {
    fn snapshot(session: &Session) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            token_hash: session.token_hash.clone(),
            ip_address: session.ip_address.clone(),
            user_agent: session.user_agent.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            is_active: session.is_active,
        }
    }

    fn to_session(&self) -> Session {
        Session {
            id: self.session_id,
            user_id: self.user_id,
            token_hash: self.token_hash.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            expires_at: self.expires_at,
            is_active: self.is_active,
        }
    }
}

fn cache_key(token_hash_hex: &str) -> String {
    format!("session:{token_hash_hex}")
}

fn hex_of(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

pub struct SessionStore {
    sessions: Arc<dyn SessionRepo>,
    users: Arc<dyn UserStore>,
    cache: Arc<dyn KeyValueStore>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
    max_concurrent: u64,
    cache_ttl: StdDuration,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionRepo>,
        users: Arc<dyn UserStore>,
        cache: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditSink>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            sessions,
            users,
            cache,
            audit,
            timeout: config.session_timeout(),
            max_concurrent: config.max_concurrent_sessions(),
            cache_ttl: StdDuration::from_secs(config.session_cache_ttl_seconds()),
        }
    }

    /// Whether the user has room for another session, i.e. the count of
    /// active, unexpired sessions is still under the concurrency limit.
    pub async fn check_concurrent_sessions(&self, user_id: Uuid) -> Result<bool> {
        let count = self.sessions.count_active(user_id, Utc::now()).await?;
        Ok(count < self.max_concurrent)
    }

    /// Create a session, evicting the least-recently-active one first when
    /// the user is at the concurrency limit. Creation itself never fails for
    /// being over the limit.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<SessionHandle> {
        let now = Utc::now();
        let active = self.sessions.list_active(user_id, now).await?;
        if active.len() as u64 >= self.max_concurrent {
            // list_active is newest-first, so the victim is at the tail.
            if let Some(oldest) = active.last() {
                self.terminate_by_row(oldest).await?;
                self.audit.record(
                    AuditEvent::new(AuditLevel::Info, "session_evicted")
                        .user(user_id)
                        .detail("concurrent session limit"),
                );
            }
        }

        let token = generate_token()?;
        let session = self
            .sessions
            .insert(NewSession {
                user_id,
                token_hash: hash_token(&token),
                ip_address: ip_address.map(str::to_string),
                user_agent: user_agent.map(str::to_string),
                created_at: now,
                last_activity: now,
                expires_at: now + self.timeout,
            })
            .await?;

        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "session_created")
                .user(user_id)
                .ip(ip_address),
        );
        Ok(SessionHandle { token, session })
    }

    /// Validate a presented token and slide the inactivity window.
    ///
    /// Checks run in a fixed order and each terminal condition maps to its
    /// own error: unknown token, inactive row, absolute expiry, account lock,
    /// account disabled, inactivity timeout. Expiry, lock, disable, and
    /// timeout all terminate the session as a side effect.
    pub async fn validate_session(&self, token: &str) -> Result<Session> {
        let key = cache_key(&hash_token_hex(token));

        let mut session = None;
        if let Some(raw) = self.cache.get(&key).await.map_err(AuthError::Internal)? {
            if let Ok(cached) = serde_json::from_str::<CachedSession>(&raw) {
                tracing::debug!(session_id = %cached.session_id, "session cache hit");
                session = Some(cached.to_session());
            } else {
                // Corrupt entry; drop it and fall through to the durable row.
                self.cache.delete(&key).await.map_err(AuthError::Internal)?;
            }
        }
        let session = match session {
            Some(session) => session,
            None => self
                .sessions
                .find_by_token_hash(&hash_token(token))
                .await
                .map_err(AuthError::Internal)?
                .ok_or(AuthError::SessionNotFound)?,
        };

        // Account flags are never trusted from the cache.
        let user = self
            .users
            .find_by_id(session.user_id)
            .await
            .map_err(AuthError::Internal)?;
        let (user_is_active, user_locked_until) = match user {
            Some(user) => (user.is_active, user.account_locked_until),
            // Orphaned session; treat the account as gone.
            None => (false, None),
        };
        self.validate_snapshot(session, user_is_active, user_locked_until, &key)
            .await
    }

    async fn validate_snapshot(
        &self,
        session: Session,
        user_is_active: bool,
        user_locked_until: Option<DateTime<Utc>>,
        key: &str,
    ) -> Result<Session> {
        let now = Utc::now();

        if !session.is_active {
            return Err(AuthError::SessionInactive);
        }
        if session.expires_at <= now {
            self.terminate_by_row(&session).await?;
            return Err(AuthError::SessionExpired);
        }
        if let Some(locked_until) = user_locked_until {
            if locked_until > now {
                self.terminate_by_row(&session).await?;
                // Ceil at millisecond precision so a lock about to lapse
                // still reads as one minute, never zero.
                let millis = (locked_until - now).num_milliseconds();
                return Err(AuthError::AccountLocked {
                    minutes_remaining: (millis + 59_999) / 60_000,
                });
            }
        }
        if !user_is_active {
            self.terminate_by_row(&session).await?;
            return Err(AuthError::AccountDisabled);
        }
        if session.last_activity + self.timeout <= now {
            self.terminate_by_row(&session).await?;
            return Err(AuthError::SessionTimedOut);
        }

        // All clear: slide the window and refresh the cache.
        let mut refreshed = session;
        refreshed.last_activity = now;
        refreshed.expires_at = now + self.timeout;
        self.sessions
            .update_activity(refreshed.id, refreshed.last_activity, refreshed.expires_at)
            .await?;
        let snapshot = CachedSession::snapshot(&refreshed);
        let raw = serde_json::to_string(&snapshot).context("failed to encode session snapshot")?;
        self.cache
            .set(key, raw, self.cache_ttl)
            .await
            .map_err(AuthError::Internal)?;
        Ok(refreshed)
    }

    /// Bump the durable activity timestamps without touching the cache; the
    /// entry heals itself when the TTL lapses.
    pub async fn update_activity(&self, session_id: Uuid) -> Result<()> {
        let now = Utc::now();
        self.sessions
            .update_activity(session_id, now, now + self.timeout)
            .await?;
        Ok(())
    }

    /// Like `update_activity`, but also drops the cache entry so the next
    /// validation sees the extension immediately.
    pub async fn extend_session(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        let now = Utc::now();
        self.sessions
            .update_activity(session_id, now, now + self.timeout)
            .await?;
        self.cache
            .delete(&cache_key(&hex_of(&session.token_hash)))
            .await?;
        Ok(())
    }

    /// Terminate the session behind a presented token. Idempotent; an
    /// unknown token is a no-op.
    pub async fn terminate_session(&self, token: &str) -> Result<()> {
        let Some(session) = self
            .sessions
            .find_by_token_hash(&hash_token(token))
            .await?
        else {
            return Ok(());
        };
        self.terminate_by_row(&session).await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "session_terminated").user(session.user_id));
        Ok(())
    }

    /// Deactivate every active session the user holds. Cached entries age
    /// out within the cache TTL.
    pub async fn terminate_all_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let sessions = self.sessions.list_active(user_id, Utc::now()).await?;
        let count = self.sessions.deactivate_all_for_user(user_id).await?;
        for session in &sessions {
            self.cache
                .delete(&cache_key(&hex_of(&session.token_hash)))
                .await?;
        }
        if count > 0 {
            self.audit.record(
                AuditEvent::new(AuditLevel::Info, "sessions_terminated_all")
                    .user(user_id)
                    .detail(&count.to_string()),
            );
        }
        Ok(count)
    }

    /// Physically delete expired and terminated rows. Run periodically.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let removed = self.sessions.delete_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "cleaned up stale sessions");
        }
        Ok(removed)
    }

    /// Active sessions, most recently used first.
    pub async fn list_active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        Ok(self.sessions.list_active(user_id, Utc::now()).await?)
    }

    async fn terminate_by_row(&self, session: &Session) -> Result<()> {
        self.sessions.deactivate(session.id).await?;
        self.cache
            .delete(&cache_key(&hex_of(&session.token_hash)))
            .await?;
        Ok(())
    }
}
