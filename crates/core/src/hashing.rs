//! Content fingerprints.
//!
//! An item's fingerprint is the SHA-256 hex digest of its source bytes.
//! The content cache compares fingerprints to decide whether an item
//! changed since it was last processed.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Fingerprint the current contents of a file.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}
