//! Postgres-backed user and session stores.
//!
//! Queries follow the same shape as the in-memory stores; single-row
//! atomicity for the failure counter comes from one `UPDATE .. RETURNING`
//! statement rather than an application-level lock.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    FailedAttempt, MfaMethod, NewSession, Session, SessionRepo, User, UserStore, UserUpdate,
};

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = r"
    id, email, first_name, last_name, password_hash, failed_login_attempts,
    account_locked_until, password_changed_at, password_history,
    must_change_password, mfa_enabled, mfa_secret, mfa_method,
    mfa_backup_codes, mfa_enabled_at, is_active, roles, phone, last_login_at
";

fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    let attempts: i32 = row.get("failed_login_attempts");
    let mfa_secret: Option<String> = row.get("mfa_secret");
    let mfa_method: Option<String> = row.get("mfa_method");
    User {
        id: row.get("id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        password_hash: row.get("password_hash"),
        failed_login_attempts: attempts.max(0) as u32,
        account_locked_until: row.get("account_locked_until"),
        password_changed_at: row.get("password_changed_at"),
        password_history: row.get("password_history"),
        must_change_password: row.get("must_change_password"),
        mfa_enabled: row.get("mfa_enabled"),
        mfa_secret: mfa_secret.map(SecretString::from),
        mfa_method: mfa_method.as_deref().and_then(MfaMethod::from_str),
        mfa_backup_codes: row.get("mfa_backup_codes"),
        mfa_enabled_at: row.get("mfa_enabled_at"),
        is_active: row.get("is_active"),
        roles: row.get("roles"),
        phone: row.get("phone"),
        last_login_at: row.get("last_login_at"),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        // Exact, case-sensitive match by contract.
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<()> {
        let mut builder = sqlx::QueryBuilder::new("UPDATE users SET updated_at = NOW()");
        if let Some(attempts) = update.failed_login_attempts {
            builder
                .push(", failed_login_attempts = ")
                .push_bind(i64::from(attempts));
        }
        if let Some(locked_until) = update.account_locked_until {
            builder
                .push(", account_locked_until = ")
                .push_bind(locked_until);
        }
        if let Some(hash) = update.password_hash {
            builder.push(", password_hash = ").push_bind(hash);
        }
        if let Some(changed_at) = update.password_changed_at {
            builder
                .push(", password_changed_at = ")
                .push_bind(changed_at);
        }
        if let Some(history) = update.password_history {
            builder.push(", password_history = ").push_bind(history);
        }
        if let Some(must_change) = update.must_change_password {
            builder
                .push(", must_change_password = ")
                .push_bind(must_change);
        }
        if let Some(enabled) = update.mfa_enabled {
            builder.push(", mfa_enabled = ").push_bind(enabled);
        }
        if let Some(secret) = update.mfa_secret {
            builder
                .push(", mfa_secret = ")
                .push_bind(secret.map(|secret| secret.expose_secret().to_string()));
        }
        if let Some(method) = update.mfa_method {
            builder
                .push(", mfa_method = ")
                .push_bind(method.map(|method| method.as_str().to_string()));
        }
        if let Some(codes) = update.mfa_backup_codes {
            builder.push(", mfa_backup_codes = ").push_bind(codes);
        }
        if let Some(enabled_at) = update.mfa_enabled_at {
            builder.push(", mfa_enabled_at = ").push_bind(enabled_at);
        }
        if let Some(last_login) = update.last_login_at {
            builder.push(", last_login_at = ").push_bind(last_login);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE users SET .. WHERE id = $1"
        );
        builder
            .build()
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user")?;
        Ok(())
    }

    async fn register_failed_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        lock_for: Duration,
    ) -> Result<FailedAttempt> {
        // Single statement so racing failures never lose an increment.
        let query = r"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                account_locked_until = CASE
                    WHEN failed_login_attempts + 1 >= $2
                    THEN NOW() + ($3 * INTERVAL '1 second')
                    ELSE account_locked_until
                END
            WHERE id = $1
            RETURNING failed_login_attempts, account_locked_until
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(i64::from(threshold))
            .bind(lock_for.num_seconds())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to register failed login attempt")?;

        let attempts: i32 = row.get("failed_login_attempts");
        Ok(FailedAttempt {
            attempts: attempts.max(0) as u32,
            locked_until: row.get("account_locked_until"),
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionRepo {
    pool: PgPool,
}

impl PgSessionRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = r"
    id, user_id, token_hash, ip_address, user_agent,
    created_at, last_activity, expires_at, is_active
";

fn session_from_row(row: &sqlx::postgres::PgRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token_hash: row.get("token_hash"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
    }
}

#[async_trait]
impl SessionRepo for PgSessionRepo {
    async fn insert(&self, session: NewSession) -> Result<Session> {
        let query = format!(
            r"
            INSERT INTO user_sessions
                (user_id, token_hash, ip_address, user_agent,
                 created_at, last_activity, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
            RETURNING {SESSION_COLUMNS}
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(session.user_id)
            .bind(&session.token_hash)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.created_at)
            .bind(session.last_activity)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        Ok(session_from_row(&row))
    }

    async fn find_by_token_hash(&self, token_hash: &[u8]) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by token")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session by id")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn update_activity(
        &self,
        id: Uuid,
        last_activity: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE user_sessions
            SET last_activity = $2, expires_at = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(last_activity)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update session activity")?;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> Result<()> {
        // Idempotent; it's fine if no rows change.
        let query = "UPDATE user_sessions SET is_active = FALSE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate session")?;
        Ok(())
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET is_active = FALSE
            WHERE user_id = $1 AND is_active = TRUE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate user sessions")?;
        Ok(result.rows_affected())
    }

    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            SELECT COUNT(*) AS active
            FROM user_sessions
            WHERE user_id = $1 AND is_active = TRUE AND expires_at > $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count active sessions")?;
        let active: i64 = row.get("active");
        Ok(active.max(0) as u64)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS}
            FROM user_sessions
            WHERE user_id = $1 AND is_active = TRUE AND expires_at > $2
            ORDER BY last_activity DESC
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list active sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE expires_at < $1 OR is_active = FALSE";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }
}
