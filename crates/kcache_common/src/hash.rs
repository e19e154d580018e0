//! Content hashing for fingerprints, cache keys and fragment validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 128-bit content hash computed using XXH3.
///
/// Every digest in the cache is a `ContentHash`: fragment hashes, source,
/// argument and configuration fingerprints, and the composed cache key.
/// Two inputs with the same `ContentHash` are assumed to be identical.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes a content hash of a UTF-8 string.
    pub fn from_str_content(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    /// Hashes the concatenation of the raw bytes of `parts`, in order.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hasher = ContentHasher::new();
        for part in parts {
            hasher.update_hash(part);
        }
        hasher.finish()
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Error returned when parsing a [`ContentHash`] from its hex form fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content hash '{input}': expected 32 hex characters")]
pub struct ParseHashError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHashError {
            input: s.to_string(),
        };
        if s.len() != 32 || !s.is_ascii() {
            return Err(err());
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(bytes))
    }
}

/// Streaming XXH3-128 hasher.
///
/// Used where a digest is built from several pieces (argument descriptors,
/// configuration lines, sub-fingerprints) without first materializing the
/// concatenation.
pub struct ContentHasher {
    state: xxhash_rust::xxh3::Xxh3,
}

impl ContentHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        Self {
            state: xxhash_rust::xxh3::Xxh3::new(),
        }
    }

    /// Feeds raw bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.state.update(data);
        self
    }

    /// Feeds a string, prefixed by its length so adjacent strings cannot
    /// run into each other.
    pub fn update_str(&mut self, text: &str) -> &mut Self {
        self.state.update(&(text.len() as u64).to_le_bytes());
        self.state.update(text.as_bytes());
        self
    }

    /// Feeds the raw bytes of another digest.
    pub fn update_hash(&mut self, hash: &ContentHash) -> &mut Self {
        self.state.update(&hash.0);
        self
    }

    /// Finalizes the digest.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.state.digest128().to_le_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
