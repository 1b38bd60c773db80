//! Login orchestration: credentials, lockout, password lifecycle, MFA
//! hand-off, and session issuance.
//!
//! The login path evaluates its gates in a fixed order. The lockout check
//! runs before the password comparison so a locked account leaks nothing
//! about credential validity, and the lockout-triggering failure itself still
//! answers with the generic credential error; the lock message only appears
//! on the following attempt.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLevel, AuditSink};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::mfa::MfaEngine;
use crate::password::{hash_password, verify_password, PasswordPolicy, UserInfo};
use crate::rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter};
use crate::session::{SessionHandle, SessionStore};
use crate::store::{KeyValueStore, User, UserStore, UserUpdate};
use crate::token::generate_token;

/// User view that is safe to hand to callers: no hash, no history, no MFA
/// secret material.
#[derive(Clone, Debug, Serialize)]
pub struct SafeUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: Vec<String>,
    pub mfa_enabled: bool,
    pub must_change_password: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for SafeUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            roles: user.roles.clone(),
            mfa_enabled: user.mfa_enabled,
            must_change_password: user.must_change_password,
            last_login_at: user.last_login_at,
        }
    }
}

/// Successful (or MFA-pending) login. `requires_mfa` with a `temp_token` and
/// no session means the caller must come back through `complete_mfa_login`.
#[derive(Clone, Debug)]
pub struct LoginResult {
    pub user: SafeUser,
    pub session: Option<SessionHandle>,
    pub requires_mfa: bool,
    pub temp_token: Option<String>,
    pub password_expiring_soon: bool,
    pub days_until_expiration: i64,
}

fn pending_login_key(user_id: Uuid) -> String {
    format!("login:pending:{user_id}")
}

pub struct AuthenticationService {
    users: Arc<dyn UserStore>,
    kv: Arc<dyn KeyValueStore>,
    sessions: Arc<SessionStore>,
    passwords: PasswordPolicy,
    mfa: Arc<MfaEngine>,
    limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
    config: AuthConfig,
}

impl AuthenticationService {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        kv: Arc<dyn KeyValueStore>,
        sessions: Arc<SessionStore>,
        passwords: PasswordPolicy,
        mfa: Arc<MfaEngine>,
        limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
        config: AuthConfig,
    ) -> Self {
        Self {
            users,
            kv,
            sessions,
            passwords,
            mfa,
            limiter,
            audit,
            config,
        }
    }

    /// Authenticate with email and password.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<LoginResult> {
        if self.limiter.check_ip(ip_address, RateLimitAction::Login) == RateLimitDecision::Limited
            || self.limiter.check_email(email, RateLimitAction::Login)
                == RateLimitDecision::Limited
        {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_rate_limited")
                    .email(email)
                    .ip(ip_address),
            );
            // The limiter does not expose its window; a minute is an honest
            // retry hint.
            return Err(AuthError::RateLimited {
                minutes_remaining: 1,
            });
        }

        let Some(user) = self.users.find_by_email(email).await? else {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_failed")
                    .email(email)
                    .ip(ip_address)
                    .detail("unknown account"),
            );
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        if let Some(locked_until) = user.account_locked_until {
            if locked_until > now {
                self.audit.record(
                    AuditEvent::new(AuditLevel::Warn, "login_failed")
                        .user(user.id)
                        .email(email)
                        .ip(ip_address)
                        .detail("account locked"),
                );
                let millis = (locked_until - now).num_milliseconds();
                return Err(AuthError::AccountLocked {
                    minutes_remaining: (millis + 59_999) / 60_000,
                });
            }
        }

        if !user.is_active {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_failed")
                    .user(user.id)
                    .ip(ip_address)
                    .detail("account disabled"),
            );
            return Err(AuthError::AccountDisabled);
        }

        if !verify_password(password, &user.password_hash) {
            let outcome = self
                .users
                .register_failed_attempt(
                    user.id,
                    self.config.max_failed_attempts(),
                    self.config.lockout_duration(),
                )
                .await?;
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_failed")
                    .user(user.id)
                    .ip(ip_address)
                    .detail("wrong password"),
            );
            if outcome.attempts == self.config.max_failed_attempts() {
                self.audit.record(
                    AuditEvent::new(AuditLevel::Warn, "account_locked")
                        .user(user.id)
                        .ip(ip_address),
                );
            }
            // The locking attempt still answers generically.
            return Err(AuthError::InvalidCredentials);
        }

        self.users
            .update(
                user.id,
                UserUpdate {
                    failed_login_attempts: Some(0),
                    account_locked_until: Some(None),
                    last_login_at: Some(now),
                    ..UserUpdate::default()
                },
            )
            .await?;

        if self.passwords.check_expiration(user.password_changed_at) {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_password_expired")
                    .user(user.id)
                    .ip(ip_address),
            );
            return Err(AuthError::PasswordExpired);
        }
        let password_expiring_soon = self.passwords.is_expiring_soon(user.password_changed_at);
        let days_until_expiration = self.passwords.days_until_expiration(user.password_changed_at);

        if user.mfa_enabled {
            let temp_token = generate_token()?;
            let ttl = self
                .config
                .temp_token_ttl()
                .to_std()
                .map_err(|e| anyhow::anyhow!("non-positive temp token TTL: {e}"))?;
            self.kv
                .set(&pending_login_key(user.id), temp_token.clone(), ttl)
                .await?;
            self.audit.record(
                AuditEvent::new(AuditLevel::Info, "login_mfa_required")
                    .user(user.id)
                    .ip(ip_address),
            );
            return Ok(LoginResult {
                user: SafeUser::from(&user),
                session: None,
                requires_mfa: true,
                temp_token: Some(temp_token),
                password_expiring_soon,
                days_until_expiration,
            });
        }

        if user.must_change_password {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_failed")
                    .user(user.id)
                    .ip(ip_address)
                    .detail("password change required"),
            );
            return Err(AuthError::MustChangePassword);
        }

        let session = self
            .sessions
            .create_session(user.id, ip_address, user_agent)
            .await?;
        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "login_success")
                .user(user.id)
                .ip(ip_address),
        );
        Ok(LoginResult {
            user: SafeUser::from(&user),
            session: Some(session),
            requires_mfa: false,
            temp_token: None,
            password_expiring_soon,
            days_until_expiration,
        })
    }

    /// Finish an MFA-gated login. Requires the pending marker written by
    /// `login`; the marker is consumed on success, so each password check buys
    /// exactly one MFA completion. Bad codes never feed the login lockout.
    pub async fn complete_mfa_login(
        &self,
        user_id: Uuid,
        code: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<LoginResult> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let pending_key = pending_login_key(user_id);
        if self.kv.get(&pending_key).await?.is_none() {
            return Err(AuthError::InvalidCredentials);
        }

        let verified = self.mfa.verify_for_login(&user, code).await?
            || self.mfa.verify_backup_code(user_id, code).await?;
        if !verified {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "mfa_failed")
                    .user(user_id)
                    .ip(ip_address),
            );
            return Err(AuthError::InvalidMfaCode);
        }
        self.kv.delete(&pending_key).await?;

        if user.must_change_password {
            self.audit.record(
                AuditEvent::new(AuditLevel::Warn, "login_failed")
                    .user(user_id)
                    .ip(ip_address)
                    .detail("password change required"),
            );
            return Err(AuthError::MustChangePassword);
        }

        let session = self
            .sessions
            .create_session(user_id, ip_address, user_agent)
            .await?;
        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "login_success")
                .user(user_id)
                .ip(ip_address)
                .detail("mfa"),
        );
        Ok(LoginResult {
            user: SafeUser::from(&user),
            session: Some(session),
            requires_mfa: false,
            temp_token: None,
            password_expiring_soon: self.passwords.is_expiring_soon(user.password_changed_at),
            days_until_expiration: self.passwords.days_until_expiration(user.password_changed_at),
        })
    }

    /// Change a password: current-password proof, then strength and history
    /// evaluated together so the caller sees every problem at once.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !verify_password(current_password, &user.password_hash) {
            return Err(AuthError::CurrentPasswordIncorrect);
        }

        let strength = self
            .passwords
            .validate_strength(new_password, Some(&UserInfo::from_user(&user)));
        let reused = verify_password(new_password, &user.password_hash)
            || self.passwords.check_history(user_id, new_password).await?;

        if !strength.is_valid {
            let mut errors = strength.errors;
            if reused {
                errors.push(AuthError::PasswordReuse.to_string());
            }
            return Err(AuthError::ValidationFailure { errors });
        }
        if reused {
            return Err(AuthError::PasswordReuse);
        }

        let new_hash = hash_password(new_password)?;
        // The outgoing hash joins the history before the new one lands.
        self.passwords
            .add_to_history(user_id, &user.password_hash)
            .await?;
        self.users
            .update(
                user_id,
                UserUpdate {
                    password_hash: Some(new_hash),
                    must_change_password: Some(false),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "password_changed").user(user_id));
        Ok(())
    }

    /// Administrative unlock. Errors when the account is not locked so a
    /// typo'd user id does not silently "succeed".
    pub async fn unlock_account(&self, user_id: Uuid, admin_id: Uuid) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_locked_at(Utc::now()) {
            return Err(AuthError::NotLocked);
        }

        self.users
            .update(
                user_id,
                UserUpdate {
                    failed_login_attempts: Some(0),
                    account_locked_until: Some(None),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "account_unlocked")
                .user(user_id)
                .admin(admin_id),
        );
        Ok(())
    }

    /// Flag the account so the next login is forced through a password change.
    pub async fn force_password_change(&self, user_id: Uuid, admin_id: Uuid) -> Result<()> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        self.users
            .update(
                user_id,
                UserUpdate {
                    must_change_password: Some(true),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "password_change_forced")
                .user(user_id)
                .admin(admin_id),
        );
        Ok(())
    }

    pub async fn admin_reset_mfa(
        &self,
        target_user_id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        self.mfa.admin_reset_mfa(target_user_id, admin_id, reason).await
    }

    /// Terminate the session behind a presented token. Idempotent.
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.sessions.terminate_session(token).await
    }
}
