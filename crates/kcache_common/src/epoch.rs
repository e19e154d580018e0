//! Epoch-scoped logical identities for structural entities.
//!
//! Storage nodes and structural objects need an identity that distinguishes
//! "same shape, different instance" without ever exposing a memory address.
//! An [`Epoch`] hands out [`LogicalId`]s in creation order. It is passed
//! explicitly to every factory that creates a structural entity, so several
//! independent epochs can coexist in one process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a structural entity within one [`Epoch`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct LogicalId(u64);

impl LogicalId {
    /// Creates a `LogicalId` from a raw value.
    ///
    /// Intended for deserialization and tests; live ids come from [`Epoch::next_id`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic logical identity counter for one runtime lifetime.
///
/// Ids increase strictly until [`reset`](Self::reset) is called by the owning
/// runtime on re-initialization, after which numbering restarts at zero.
#[derive(Debug, Default)]
pub struct Epoch {
    next: AtomicU64,
}

impl Epoch {
    /// Creates a fresh epoch whose first id is zero.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocates the next logical id.
    pub fn next_id(&self) -> LogicalId {
        LogicalId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns how many ids were handed out since creation or the last reset.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Restarts numbering at zero.
    ///
    /// Entities created before the reset keep their ids; callers must discard
    /// any in-process tables keyed by them.
    pub fn reset(&self) {
        self.next.store(0, Ordering::Relaxed);
    }
}
