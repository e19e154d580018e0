//! Cache keys composed from the individual fingerprints.

use crate::callable::Purity;
use kcache_common::{ContentHash, ContentHasher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The key under which a compiled artifact is stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Composes a key from its parts.
    ///
    /// Each part is fixed-width, so no separator is needed.
    pub fn compose(
        source: &ContentHash,
        args: &ContentHash,
        config: &ContentHash,
        purity: Purity,
    ) -> Self {
        let mut hasher = ContentHasher::new();
        hasher
            .update_hash(source)
            .update_hash(args)
            .update_hash(config)
            .update(&[purity.key_byte()]);
        CacheKey(hasher.finish())
    }

    /// The underlying digest.
    pub fn digest(&self) -> ContentHash {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({:?})", self.0)
    }
}

impl FromStr for CacheKey {
    type Err = kcache_common::hash::ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(CacheKey)
    }
}
