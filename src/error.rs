//! Error taxonomy for the authentication core.
//!
//! Every variant carries information the caller must act on or display.
//! Credential-stage failures are deliberately uninformative (no "no such
//! user" vs "wrong password" distinction) to prevent account enumeration;
//! lockout and expiration failures are informative because the user needs
//! actionable guidance.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email or wrong password; indistinguishable on purpose.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is locked. Please try again in {minutes_remaining} minutes")]
    AccountLocked { minutes_remaining: i64 },

    #[error("Account is disabled. Please contact your administrator")]
    AccountDisabled,

    #[error("Your password has expired. Please reset your password")]
    PasswordExpired,

    #[error("Invalid MFA code")]
    InvalidMfaCode,

    #[error("MFA is not enabled for this user")]
    MfaNotEnabled,

    #[error("Password must be changed before continuing")]
    MustChangePassword,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session is not active")]
    SessionInactive,

    #[error("Session has expired")]
    SessionExpired,

    #[error("Session timed out due to inactivity")]
    SessionTimedOut,

    /// Password policy violations; carries the full list of violated rules.
    #[error("Password does not meet security requirements: {}", errors.join("; "))]
    ValidationFailure { errors: Vec<String> },

    #[error("Cannot reuse one of your last 10 passwords")]
    PasswordReuse,

    #[error("Current password is incorrect")]
    CurrentPasswordIncorrect,

    #[error("Account is not locked")]
    NotLocked,

    #[error("User not found")]
    UserNotFound,

    #[error("Too many attempts. Please try again in {minutes_remaining} minutes")]
    RateLimited { minutes_remaining: i64 },

    /// Store or collaborator failure; not part of this core's contract.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
