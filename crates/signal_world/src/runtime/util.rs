//! Utility functions for the runtime module.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::WorldError;

/// Compute the SHA256 hash of a serializable value.
pub fn hash_json<T: Serialize>(value: &T) -> Result<String, WorldError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(sha256_hex(&bytes))
}

/// Compute the SHA256 hash of bytes and return it as a hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
