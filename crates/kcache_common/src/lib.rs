//! Shared foundational types used across the kernel fingerprint cache.
//!
//! This crate provides content hashing, the epoch-scoped logical identity
//! counter for structural entities, and interned callable names.

#![warn(missing_docs)]

pub mod epoch;
pub mod hash;
pub mod ident;

pub use epoch::{Epoch, LogicalId};
pub use hash::{ContentHash, ContentHasher};
pub use ident::{Ident, Interner};
