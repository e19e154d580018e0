//! Error types for cache operations and call resolution.

use crate::backend::CompileError;
use kcache_fingerprint::{FingerprintError, SpecializationError};
use std::path::PathBuf;

/// Errors that can occur while writing cache files.
///
/// Reads never produce this error: a missing, corrupt or incompatible file is
/// a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record or header could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

/// Errors returned by [`KernelCache::resolve`](crate::KernelCache::resolve).
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The callable id is not registered.
    #[error("callable `{name}` is not registered")]
    UnknownCallable {
        /// The qualified name behind the id.
        name: String,
    },

    /// The arguments do not fit the callable's signature.
    #[error("cannot specialize `{callable}`: {source}")]
    Specialization {
        /// The callable.
        callable: String,
        /// The underlying error.
        source: SpecializationError,
    },

    /// Fingerprinting failed in a way that must not be papered over by
    /// compiling uncached (a soundness violation, for instance).
    #[error(transparent)]
    Fingerprint(FingerprintError),

    /// The backend failed; nothing was cached.
    #[error("compiling `{callable}` failed: {source}")]
    Compile {
        /// The callable.
        callable: String,
        /// The backend's error, unchanged.
        source: CompileError,
    },
}
