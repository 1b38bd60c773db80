//! Token generation and hashing helpers.
//!
//! Raw tokens are only ever returned to the caller; the stores keep a
//! SHA-256 digest so a leaked database cannot be replayed as a bearer token.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Create a new opaque bearer token: 256 bits of randomness, URL-safe encoded.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token for storage and lookup.
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hex form of a token hash, used as a cache key component.
pub fn hash_token_hex(token: &str) -> String {
    hash_token(token)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
