use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a payload. The server dedups on this value, so it
/// must be stable across devices and restarts.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
