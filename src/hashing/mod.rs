//! Digests over acquired memory.
//!
//! An image is far too large to hash in one call, so [`DigestState`] is fed
//! incrementally as bytes leave the session and finalized at end of stream.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Computes the SHA-256 digest of the given data and returns it as a hex string.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes the BLAKE3 digest of the given data and returns it as a hex string.
pub fn blake3_digest(data: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    hasher.finalize().to_hex().to_string()
}

/// Finished digest of an acquired stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDigest {
    pub sha256: String,
    pub blake3: String,
    /// Number of bytes hashed
    pub bytes: u64,
}

impl fmt::Display for StreamDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sha256={} blake3={} bytes={}",
            self.sha256, self.blake3, self.bytes
        )
    }
}

/// Running digest state.
#[derive(Clone)]
pub struct DigestState {
    sha256: Sha256,
    blake3: blake3::Hasher,
    bytes: u64,
}

impl Default for DigestState {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestState {
    pub fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            blake3: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.blake3.update(data);
        self.bytes += data.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> StreamDigest {
        StreamDigest {
            sha256: hex::encode(self.sha256.finalize()),
            blake3: self.blake3.finalize().to_hex().to_string(),
            bytes: self.bytes,
        }
    }
}

impl fmt::Debug for DigestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestState")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}
