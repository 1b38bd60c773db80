//! Multi-factor authentication engine.
//!
//! TOTP enrollment is a two-step commit: `generate_secret` hands the caller a
//! seed, QR code, and backup codes but persists nothing; `enable` re-receives
//! them with a proof code and only then writes MFA state, so an abandoned
//! enrollment leaves no trace. Verification never mutates login lockout state;
//! the login and MFA failure counters are independent on purpose.

pub mod backup;
pub mod sms;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLevel, AuditSink};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::store::{KeyValueStore, MfaMethod, SmsSender, User, UserStore, UserUpdate};

use sms::{SmsCodes, SmsVerification, VerifyLockout};

/// Everything the user needs to finish enrollment. Shown once; the server
/// keeps none of it until `enable` succeeds.
#[derive(Clone, Debug)]
pub struct MfaEnrollment {
    /// Base32 seed.
    pub secret: String,
    /// PNG data URL for authenticator apps.
    pub qr_code: String,
    /// The seed grouped for hand entry.
    pub manual_entry_key: String,
    /// Ten one-time recovery codes, plaintext.
    pub backup_codes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MfaStatus {
    pub enabled: bool,
    pub method: Option<MfaMethod>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub backup_codes_remaining: usize,
}

pub struct MfaEngine {
    users: Arc<dyn UserStore>,
    kv: Arc<dyn KeyValueStore>,
    audit: Arc<dyn AuditSink>,
    sms_codes: SmsCodes,
    verify_lockout: VerifyLockout,
    issuer: String,
}

impl MfaEngine {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        kv: Arc<dyn KeyValueStore>,
        sms_sender: Arc<dyn SmsSender>,
        audit: Arc<dyn AuditSink>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            users,
            audit,
            sms_codes: SmsCodes::new(
                kv.clone(),
                sms_sender,
                config.sms_code_ttl(),
                config.sms_max_attempts(),
            ),
            verify_lockout: VerifyLockout::new(
                kv.clone(),
                config.verify_lockout_threshold(),
                config.verify_lockout_duration(),
            ),
            kv,
            issuer: config.totp_issuer().to_string(),
        }
    }

    /// Step one of enrollment. Persists nothing.
    pub async fn generate_secret(&self, user_id: Uuid) -> Result<MfaEnrollment> {
        let user = self.require_user(user_id).await?;
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation error: {e}"))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            user.email.clone(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR generation error: {e}"))?;
        let secret_base32 = totp.get_secret_base32();
        let codes = backup::generate();

        Ok(MfaEnrollment {
            manual_entry_key: manual_entry_key(&secret_base32),
            qr_code: format!("data:image/png;base64,{qr}"),
            secret: secret_base32,
            backup_codes: codes.plaintext,
        })
    }

    /// Step two: verify the proof code against the supplied seed, then persist
    /// the whole MFA configuration atomically. A bad code persists nothing.
    pub async fn enable(
        &self,
        user_id: Uuid,
        secret: &str,
        verification_code: &str,
        backup_codes: &[String],
        method: MfaMethod,
    ) -> Result<()> {
        let user = self.require_user(user_id).await?;

        if matches!(method, MfaMethod::Sms | MfaMethod::Both) && user.phone.is_none() {
            return Err(AuthError::ValidationFailure {
                errors: vec!["A phone number is required for SMS verification".to_string()],
            });
        }

        if method.includes_totp() {
            if !check_totp(secret, verification_code)? {
                return Err(AuthError::InvalidMfaCode);
            }
        } else {
            match self.sms_codes.verify(user_id, verification_code).await? {
                SmsVerification::Valid => {}
                _ => return Err(AuthError::InvalidMfaCode),
            }
        }

        let digests = backup_codes.iter().map(|code| backup::digest(code)).collect();
        let stored_secret = method
            .includes_totp()
            .then(|| SecretString::from(secret.to_string()));
        self.users
            .update(
                user_id,
                UserUpdate {
                    mfa_enabled: Some(true),
                    mfa_secret: Some(stored_secret),
                    mfa_method: Some(Some(method)),
                    mfa_backup_codes: Some(digests),
                    mfa_enabled_at: Some(Some(Utc::now())),
                    ..UserUpdate::default()
                },
            )
            .await?;

        self.audit.record(
            AuditEvent::new(AuditLevel::Info, "mfa_enabled")
                .user(user_id)
                .detail(method.as_str()),
        );
        Ok(())
    }

    /// Fails closed: a valid current code is required to turn MFA off.
    pub async fn disable(&self, user_id: Uuid, verification_code: &str) -> Result<()> {
        let user = self.require_user(user_id).await?;
        if !user.mfa_enabled {
            return Err(AuthError::MfaNotEnabled);
        }
        if !self.verify_for_login(&user, verification_code).await? {
            return Err(AuthError::InvalidMfaCode);
        }

        self.clear_mfa_state(user_id).await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "mfa_disabled").user(user_id));
        Ok(())
    }

    /// Check a login-time code against the user's enrolled factor. TOTP for
    /// TOTP-bearing methods, SMS challenge otherwise. A wrong code is `false`,
    /// never an error.
    pub async fn verify_for_login(&self, user: &User, code: &str) -> Result<bool> {
        if !user.mfa_enabled {
            return Err(AuthError::MfaNotEnabled);
        }
        match (&user.mfa_secret, user.mfa_method) {
            (Some(secret), Some(method)) if method.includes_totp() => {
                check_totp(secret.expose_secret(), code)
            }
            (_, Some(MfaMethod::Sms)) => Ok(self
                .sms_codes
                .verify(user.id, code)
                .await?
                == SmsVerification::Valid),
            _ => Err(AuthError::MfaNotEnabled),
        }
    }

    /// Check a backup code and burn it on a match. Tolerates an empty list.
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> Result<bool> {
        let user = self.require_user(user_id).await?;
        let Some(index) = backup::find_match(code, &user.mfa_backup_codes) else {
            return Ok(false);
        };

        let mut remaining = user.mfa_backup_codes;
        remaining.remove(index);
        self.users
            .update(
                user_id,
                UserUpdate {
                    mfa_backup_codes: Some(remaining),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "mfa_backup_code_used").user(user_id));
        Ok(true)
    }

    /// Replace the whole backup-code set. Requires a valid current code.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        verification_code: &str,
    ) -> Result<Vec<String>> {
        let user = self.require_user(user_id).await?;
        if !user.mfa_enabled {
            return Err(AuthError::MfaNotEnabled);
        }
        if !self.verify_for_login(&user, verification_code).await? {
            return Err(AuthError::InvalidMfaCode);
        }

        let codes = backup::generate();
        self.users
            .update(
                user_id,
                UserUpdate {
                    mfa_backup_codes: Some(codes.digests),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "mfa_backup_codes_regenerated").user(user_id));
        Ok(codes.plaintext)
    }

    /// Send a fresh SMS challenge to the user's enrolled phone number.
    pub async fn send_sms_code(&self, user_id: Uuid) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let Some(phone) = user.phone else {
            return Err(AuthError::MfaNotEnabled);
        };
        self.sms_codes.send(user_id, &phone).await?;
        self.audit
            .record(AuditEvent::new(AuditLevel::Info, "mfa_sms_sent").user(user_id));
        Ok(())
    }

    /// Verify an SMS challenge, with the verification lockout checked before
    /// the code is even looked at.
    pub async fn verify_sms_code(&self, user_id: Uuid, code: &str) -> Result<()> {
        if let Some(minutes_remaining) = self.verify_lockout.minutes_remaining(user_id).await? {
            return Err(AuthError::RateLimited { minutes_remaining });
        }
        match self.sms_codes.verify(user_id, code).await? {
            SmsVerification::Valid => {
                self.verify_lockout.clear(user_id).await?;
                Ok(())
            }
            SmsVerification::Mismatch | SmsVerification::Unavailable => {
                self.verify_lockout.record_failure(user_id).await?;
                self.audit.record(
                    AuditEvent::new(AuditLevel::Warn, "mfa_sms_verify_failed").user(user_id),
                );
                Err(AuthError::InvalidMfaCode)
            }
        }
    }

    /// Unconditional administrative reset. Clears MFA configuration and any
    /// pending challenge or lockout state; always audited with the reason.
    pub async fn admin_reset_mfa(
        &self,
        target_user_id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        self.require_user(target_user_id).await?;
        self.clear_mfa_state(target_user_id).await?;
        self.audit.record(
            AuditEvent::new(AuditLevel::Warn, "mfa_admin_reset")
                .user(target_user_id)
                .admin(admin_id)
                .detail(reason),
        );
        Ok(())
    }

    pub async fn status(&self, user_id: Uuid) -> Result<MfaStatus> {
        let user = self.require_user(user_id).await?;
        Ok(MfaStatus {
            enabled: user.mfa_enabled,
            method: user.mfa_method,
            enabled_at: user.mfa_enabled_at,
            backup_codes_remaining: user.mfa_backup_codes.len(),
        })
    }

    async fn clear_mfa_state(&self, user_id: Uuid) -> Result<()> {
        self.users
            .update(
                user_id,
                UserUpdate {
                    mfa_enabled: Some(false),
                    mfa_secret: Some(None),
                    mfa_method: Some(None),
                    mfa_backup_codes: Some(Vec::new()),
                    mfa_enabled_at: Some(None),
                    ..UserUpdate::default()
                },
            )
            .await?;
        self.kv.delete(&sms::challenge_key(user_id)).await?;
        self.kv.delete(&sms::lockout_key(user_id)).await?;
        Ok(())
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

/// One 30-second step with one step of skew either way, per RFC 6238.
fn check_totp(secret_base32: &str, code: &str) -> Result<bool> {
    let secret_bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("invalid base32 secret: {e}"))?;
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        None,
        "user".to_string(),
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))?;
    Ok(totp.check_current(code).unwrap_or(false))
}

fn manual_entry_key(secret_base32: &str) -> String {
    secret_base32
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
