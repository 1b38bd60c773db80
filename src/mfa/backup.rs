//! One-time backup codes for MFA recovery.
//!
//! Codes are shown to the user exactly once at generation time; only their
//! SHA-256 digests are persisted. The alphabet excludes ambiguous glyphs
//! (0/O, 1/I/L) because these codes get read over the phone to help-desk
//! staff and typed by hand.

use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

const CODE_COUNT: usize = 10;
const GROUP_LENGTH: usize = 4;
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: the plaintext codes for one-time display and
/// the digests to persist.
#[derive(Clone, Debug)]
pub struct BackupCodes {
    pub plaintext: Vec<String>,
    pub digests: Vec<String>,
}

/// Generate ten codes in `XXXX-XXXX` form.
#[must_use]
pub fn generate() -> BackupCodes {
    let mut rng = OsRng;
    let mut plaintext = Vec::with_capacity(CODE_COUNT);
    let mut digests = Vec::with_capacity(CODE_COUNT);
    for _ in 0..CODE_COUNT {
        let code = format!("{}-{}", random_group(&mut rng), random_group(&mut rng));
        digests.push(digest(&code));
        plaintext.push(code);
    }
    BackupCodes { plaintext, digests }
}

fn random_group(rng: &mut OsRng) -> String {
    (0..GROUP_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Hex SHA-256 digest of a code in canonical form.
#[must_use]
pub fn digest(code: &str) -> String {
    let canonical = normalize(code);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Canonical form: uppercase with the hyphen reinserted, tolerant of the
/// user omitting it or typing lowercase.
#[must_use]
pub fn normalize(code: &str) -> String {
    let compact: String = code
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if compact.len() == GROUP_LENGTH * 2 {
        format!(
            "{}-{}",
            &compact[..GROUP_LENGTH],
            &compact[GROUP_LENGTH..]
        )
    } else {
        compact
    }
}

/// Find the digest of `code` among `stored`. Returns the index so the caller
/// can burn the matched entry.
#[must_use]
pub fn find_match(code: &str, stored: &[String]) -> Option<usize> {
    let candidate = digest(code);
    stored.iter().position(|entry| *entry == candidate)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
