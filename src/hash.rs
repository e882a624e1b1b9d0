//! Content addressing: derive a stable identity from uploaded bytes.
//!
//! The identity keys both the result cache and the progress checkpoint, so
//! the same drawing uploaded under two filenames (or by two callers) maps to
//! the same stored work. SHA-256 is used for its fixed-width output and
//! negligible collision rate, not for any security property.

use crate::error::BalloonError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hex length of a SHA-256 digest.
const HASH_HEX_LEN: usize = 64;

/// Digest over the raw bytes of an upload.
///
/// Always 64 lowercase hex characters, which also makes it safe to embed
/// in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `bytes`. Pure: identical bytes always give an identical hash.
    pub fn compute(bytes: &[u8]) -> Self {
        ContentHash(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = BalloonError;

    /// Parse a hash received from a caller (e.g. a URL segment).
    ///
    /// Anything that is not exactly 64 hex digits is rejected so a hash can
    /// never smuggle path separators into the storage layout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != HASH_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BalloonError::InvalidInput {
                reason: format!("'{s}' is not a content hash"),
            });
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = BalloonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.0
    }
}
