//! # capsule-hash
//!
//! Two independent 256-bit content hashes: a primary (BLAKE3, the canonical
//! blob identity) and a secondary (SHA-256, used only as an alternate
//! lookup key). Both are hex-encoded lowercase.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// The name of the primary hash family, used in pointer files and on-disk
/// directory names (`<primary-name>/<pp>/<hash>`).
pub const PRIMARY_NAME: &str = "blake3";
/// The name of the secondary hash family.
pub const SECONDARY_NAME: &str = "sha256";

#[derive(Error, Debug)]
pub enum HashError {
    #[error("invalid hash: {0}")]
    InvalidHash(String),
}

pub type Result<T> = std::result::Result<T, HashError>;

impl capsule_support::ClassifyError for HashError {
    fn kind(&self) -> capsule_support::ErrorKind {
        match self {
            HashError::InvalidHash(_) => capsule_support::ErrorKind::InvalidHash,
        }
    }
}

/// Pair produced by [`dual_hash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    pub primary: String,
    pub secondary: String,
}

/// Compute the primary (BLAKE3) hash of `data`, hex-encoded.
#[inline]
pub fn hash(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Compute the secondary (SHA-256) hash of `data`, hex-encoded.
#[inline]
pub fn secondary_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute both hashes of `data` in one call.
pub fn dual_hash(data: &[u8]) -> HashResult {
    HashResult {
        primary: hash(data),
        secondary: secondary_hash(data),
    }
}

/// A hash string is valid iff it is exactly 64 lowercase hex characters.
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Validate a hash string, returning [`HashError::InvalidHash`] if malformed.
/// Every public operation in the workspace that accepts a hash string calls
/// this before using it.
pub fn validate(s: &str) -> Result<()> {
    if is_valid_hash(s) {
        Ok(())
    } else {
        Err(HashError::InvalidHash(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"Hello, Capsule!";
        assert_eq!(hash(data), hash(data));
        assert_eq!(secondary_hash(data), secondary_hash(data));
    }

    #[test]
    fn primary_and_secondary_are_independent() {
        let data = b"some bytes";
        let h = dual_hash(data);
        assert_ne!(h.primary, h.secondary);
        assert_eq!(h.primary, hash(data));
        assert_eq!(h.secondary, secondary_hash(data));
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let h = hash(b"x");
        assert_eq!(h.len(), 64);
        assert!(is_valid_hash(&h));
    }

    #[test]
    fn empty_blob_hash_is_a_stable_constant() {
        // BLAKE3 of the empty input is a well-known constant.
        assert_eq!(
            hash(b""),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn validates_hash_form() {
        assert!(is_valid_hash(&"a".repeat(64)));
        assert!(!is_valid_hash(&"A".repeat(64)));
        assert!(!is_valid_hash("short"));
        assert!(!is_valid_hash(&"g".repeat(64)));
        assert!(validate(&"0".repeat(64)).is_ok());
        assert!(validate("not-a-hash").is_err());
    }
}
