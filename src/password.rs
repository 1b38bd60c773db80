//! Password policy: strength scoring, reuse history, and expiration.
//!
//! Strength validation accumulates every violated rule instead of stopping at
//! the first one, so a caller gets the complete picture in a single pass. The
//! score is advisory feedback for the UI; validity is decided by the error
//! list alone.

use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::store::{UserStore, UserUpdate};
use uuid::Uuid;

const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
const EXPIRY_WARN_DAYS: i64 = 7;

/// Substrings that disqualify a password outright.
const COMMON_PASSWORDS: &[&str] = &[
    "password", "123456", "12345678", "qwerty", "abc123", "letmein", "welcome", "admin",
    "monkey", "dragon", "master", "iloveyou", "sunshine", "princess", "football", "baseball",
    "trustno1", "superman",
];

/// Keyboard and ordered runs checked three characters at a time, both directions.
const SEQUENCES: &[&str] = &[
    "qwertyuiop",
    "asdfghjkl",
    "zxcvbnm",
    "abcdefghijklmnopqrstuvwxyz",
    "0123456789",
];

/// Result of a strength check. `score` is 0-100 and advisory only.
#[derive(Clone, Debug)]
pub struct StrengthReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub score: u8,
}

/// Identity fragments a password must not contain.
#[derive(Clone, Debug, Default)]
pub struct UserInfo {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserInfo {
    #[must_use]
    pub fn from_user(user: &crate::store::User) -> Self {
        Self {
            email: Some(user.email.clone()),
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
        }
    }
}

/// Hash a password with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored PHC hash string.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

pub struct PasswordPolicy {
    users: Arc<dyn UserStore>,
    min_length: usize,
    expiry_days: i64,
    history_size: usize,
}

impl PasswordPolicy {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        Self {
            users,
            min_length: config.password_min_length(),
            expiry_days: config.password_expiry_days(),
            history_size: config.password_history_size(),
        }
    }

    /// Validate strength. Every rule contributes independently; nothing
    /// short-circuits, so the error list is complete.
    #[must_use]
    pub fn validate_strength(&self, password: &str, user_info: Option<&UserInfo>) -> StrengthReport {
        let mut errors = Vec::new();
        let mut score: i32 = 0;
        let lowered = password.to_lowercase();
        let length = password.chars().count();

        if length < self.min_length {
            errors.push(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        } else {
            let bonus = ((length - self.min_length) * 2).min(20) as i32;
            score += 20 + bonus;
        }

        if password.chars().any(|ch| ch.is_ascii_uppercase()) {
            score += 15;
        } else {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if password.chars().any(|ch| ch.is_ascii_lowercase()) {
            score += 15;
        } else {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if password.chars().any(|ch| ch.is_ascii_digit()) {
            score += 15;
        } else {
            errors.push("Password must contain at least one number".to_string());
        }
        if password.chars().any(|ch| SPECIAL_CHARACTERS.contains(ch)) {
            score += 15;
        } else {
            errors.push("Password must contain at least one special character".to_string());
        }

        if COMMON_PASSWORDS.iter().any(|common| lowered.contains(common)) {
            errors.push("Password contains a commonly used password".to_string());
            score -= 30;
        }

        if let Some(info) = user_info {
            if contains_user_info(&lowered, info) {
                errors.push("Password must not contain your name or email".to_string());
                score -= 20;
            }
        }

        if contains_sequence(&lowered) {
            errors.push("Password must not contain sequential characters".to_string());
            score -= 10;
        }

        if has_repeated_run(password) {
            errors.push("Password must not repeat the same character three or more times".to_string());
            score -= 10;
        }

        StrengthReport {
            is_valid: errors.is_empty(),
            score: score.clamp(0, 100) as u8,
            errors,
        }
    }

    /// True when the candidate matches a password in the user's history.
    /// Every entry is checked; there is no early exit.
    pub async fn check_history(&self, user_id: Uuid, candidate: &str) -> Result<bool> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let mut found = false;
        for stored in &user.password_history {
            if verify_password(candidate, stored) {
                found = true;
            }
        }
        Ok(found)
    }

    /// Prepend a hash to the history, truncate to the retention window, and
    /// stamp the change time.
    pub async fn add_to_history(&self, user_id: Uuid, hash: &str) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let mut history = user.password_history;
        history.insert(0, hash.to_string());
        history.truncate(self.history_size);
        self.users
            .update(
                user_id,
                UserUpdate {
                    password_history: Some(history),
                    password_changed_at: Some(Utc::now()),
                    ..UserUpdate::default()
                },
            )
            .await?;
        Ok(())
    }

    /// True once more than the expiry window has elapsed. Exactly at the
    /// boundary the password is still valid.
    #[must_use]
    pub fn check_expiration(&self, password_changed_at: DateTime<Utc>) -> bool {
        self.check_expiration_at(password_changed_at, Utc::now())
    }

    #[must_use]
    pub fn check_expiration_at(
        &self,
        password_changed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        now > password_changed_at + Duration::days(self.expiry_days)
    }

    /// Whole days until the password expires, never negative.
    #[must_use]
    pub fn days_until_expiration(&self, password_changed_at: DateTime<Utc>) -> i64 {
        self.days_until_expiration_at(password_changed_at, Utc::now())
    }

    #[must_use]
    pub fn days_until_expiration_at(
        &self,
        password_changed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> i64 {
        let elapsed_days = (now - password_changed_at).num_days();
        (self.expiry_days - elapsed_days).max(0)
    }

    /// True inside the warning window: not yet expired and six or fewer whole
    /// days remaining. Exactly seven days out is not yet "soon".
    #[must_use]
    pub fn is_expiring_soon(&self, password_changed_at: DateTime<Utc>) -> bool {
        self.is_expiring_soon_at(password_changed_at, Utc::now())
    }

    #[must_use]
    pub fn is_expiring_soon_at(
        &self,
        password_changed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        !self.check_expiration_at(password_changed_at, now)
            && self.days_until_expiration_at(password_changed_at, now) < EXPIRY_WARN_DAYS
    }
}

fn contains_user_info(lowered_password: &str, info: &UserInfo) -> bool {
    let mut fragments = Vec::new();
    if let Some(email) = &info.email {
        if let Some(local_part) = email.split('@').next() {
            fragments.push(local_part.to_lowercase());
        }
    }
    if let Some(first) = &info.first_name {
        fragments.push(first.to_lowercase());
    }
    if let Some(last) = &info.last_name {
        fragments.push(last.to_lowercase());
    }
    fragments
        .iter()
        .filter(|fragment| fragment.len() > 3)
        .any(|fragment| lowered_password.contains(fragment.as_str()))
}

fn contains_sequence(lowered_password: &str) -> bool {
    for sequence in SEQUENCES {
        let reversed: String = sequence.chars().rev().collect();
        for run in [*sequence, reversed.as_str()] {
            let chars: Vec<char> = run.chars().collect();
            for window in chars.windows(3) {
                let triple: String = window.iter().collect();
                if lowered_password.contains(&triple) {
                    return true;
                }
            }
        }
    }
    false
}

fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars
        .windows(3)
        .any(|window| window[0] == window[1] && window[1] == window[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;
    use crate::store::User;

    fn policy() -> (PasswordPolicy, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let policy = PasswordPolicy::new(store.clone(), &AuthConfig::new());
        (policy, store)
    }

    #[test]
    fn short_passwords_always_report_length() {
        let (policy, _) = policy();
        for password in ["", "a", "Short1!", "Ab1!Ab1!Ab1"] {
            let report = policy.validate_strength(password, None);
            assert!(
                report
                    .errors
                    .iter()
                    .any(|error| error.contains("at least 12 characters")),
                "missing length error for {password:?}"
            );
            assert!(!report.is_valid);
        }
    }

    #[test]
    fn strong_password_passes_with_high_score() {
        let (policy, _) = policy();
        let report = policy.validate_strength("Vk9#mQ2$wXp7Lf", None);
        assert!(report.is_valid, "errors: {:?}", report.errors);
        assert!(report.score >= 80);
    }

    #[test]
    fn errors_accumulate_without_short_circuit() {
        let (policy, _) = policy();
        // Short, all lowercase, no digit, no special char.
        let report = policy.validate_strength("weak", None);
        assert!(report.errors.len() >= 3);
    }

    #[test]
    fn common_password_penalized_alongside_other_checks() {
        let (policy, _) = policy();
        let report = policy.validate_strength("Password12345!", None);
        assert!(report
            .errors
            .iter()
            .any(|error| error.contains("commonly used")));
        // The other rules still ran.
        assert_eq!(report.errors.len(), 2); // common + sequential (345 / 123)
    }

    #[test]
    fn rejects_user_info_fragments() {
        let (policy, _) = policy();
        let info = UserInfo {
            email: Some("mallory@example.com".to_string()),
            first_name: Some("Mallory".to_string()),
            last_name: Some("Vu".to_string()),
        };
        let report = policy.validate_strength("Mallory#Vk9$wQ", Some(&info));
        assert!(report
            .errors
            .iter()
            .any(|error| error.contains("name or email")));

        // Fragments of three characters or fewer are ignored ("Vu").
        let report = policy.validate_strength("Vu9#mQ2$wXp7Lf", Some(&info));
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn rejects_keyboard_and_ordered_sequences() {
        let (policy, _) = policy();
        for password in ["Qwe9#mK2$wXpL", "Vk9#mQ2$w321L", "Vk9#mQ2$wabcL"] {
            let report = policy.validate_strength(password, None);
            assert!(
                report
                    .errors
                    .iter()
                    .any(|error| error.contains("sequential")),
                "expected sequence error for {password:?}"
            );
        }
    }

    #[test]
    fn rejects_repeated_runs() {
        let (policy, _) = policy();
        let report = policy.validate_strength("Vk9#mQ2$wXaaaL", None);
        assert!(report.errors.iter().any(|error| error.contains("repeat")));
    }

    #[test]
    fn score_is_clamped() {
        let (policy, _) = policy();
        let report = policy.validate_strength("password", None);
        // Even with penalties stacked, the score never goes negative.
        assert!(report.score <= 100);
    }

    #[test]
    fn expiration_boundary_is_exclusive() {
        let (policy, _) = policy();
        let changed_at = Utc::now();
        let exactly_90 = changed_at + Duration::days(90);
        let just_past = exactly_90 + Duration::seconds(1);

        assert!(!policy.check_expiration_at(changed_at, exactly_90));
        assert!(policy.check_expiration_at(changed_at, just_past));
    }

    #[test]
    fn days_until_expiration_floors_and_clamps() {
        let (policy, _) = policy();
        let now = Utc::now();
        assert_eq!(
            policy.days_until_expiration_at(now - Duration::days(30), now),
            60
        );
        assert_eq!(
            policy.days_until_expiration_at(now - Duration::days(84), now),
            6
        );
        assert_eq!(
            policy.days_until_expiration_at(now - Duration::days(120), now),
            0
        );
    }

    #[test]
    fn expiring_soon_window_is_zero_to_six_days() {
        let (policy, _) = policy();
        let now = Utc::now();
        // 6 days remaining: warn.
        assert!(policy.is_expiring_soon_at(now - Duration::days(84), now));
        // 10 days remaining: no warning.
        assert!(!policy.is_expiring_soon_at(now - Duration::days(80), now));
        // Exactly 7 days remaining: not yet.
        assert!(!policy.is_expiring_soon_at(now - Duration::days(83), now));
        // Already expired: expired, not "expiring".
        assert!(!policy.is_expiring_soon_at(now - Duration::days(91), now));
    }

    #[tokio::test]
    async fn history_round_trip() {
        let (policy, store) = policy();
        let user = User::new("history@example.com", "unused");
        let id = user.id;
        store.insert(user).await;

        let hash = hash_password("OldSecret#42xYz").unwrap();
        policy.add_to_history(id, &hash).await.unwrap();

        assert!(policy.check_history(id, "OldSecret#42xYz").await.unwrap());
        assert!(!policy.check_history(id, "NeverUsed#42xYz").await.unwrap());
    }

    #[tokio::test]
    async fn history_truncates_to_ten_newest_first() {
        let (policy, store) = policy();
        let user = User::new("truncate@example.com", "unused");
        let id = user.id;
        store.insert(user).await;

        for index in 0..12 {
            policy
                .add_to_history(id, &format!("hash-{index}"))
                .await
                .unwrap();
        }

        let user = store.get(id).await.unwrap();
        assert_eq!(user.password_history.len(), 10);
        assert_eq!(user.password_history[0], "hash-11");
        assert_eq!(user.password_history[9], "hash-2");
    }
}
