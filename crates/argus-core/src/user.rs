//! Users and four-key code hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded salted SHA-256 of a short keypad code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FourKeyHash(String);

impl FourKeyHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hashes an access code the same way the REST layer stores it:
/// `sha256("<code>:<salt>")` as lowercase hex.
pub fn hash_access_code(code: &str, salt: &str) -> FourKeyHash {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    FourKeyHash(hex::encode(hasher.finalize()))
}

/// A user as far as the monitoring engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub fourkey_code: FourKeyHash,
}
