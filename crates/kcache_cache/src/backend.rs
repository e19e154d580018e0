//! The compiler backend seam.

use kcache_config::CompileConfig;
use kcache_fingerprint::{ArgumentDescriptor, CacheKey, CallableDef};

/// Error reported by a compiler backend. Propagated to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    /// The backend's message.
    pub message: String,
}

impl CompileError {
    /// Creates a compile error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Everything a backend receives for one compilation.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    /// The callable being compiled.
    pub callable: &'a CallableDef,
    /// The cache key, absent when the call abstained from caching.
    pub key: Option<CacheKey>,
    /// One descriptor per argument.
    pub descriptors: &'a [ArgumentDescriptor],
    /// The active compiler configuration.
    pub config: &'a CompileConfig,
}

/// Compiles callables to artifact bytes.
pub trait CompilerBackend: Send + Sync {
    /// Compiles one specialization of a callable.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileError>;
}

impl<F> CompilerBackend for F
where
    F: Fn(&CompileRequest<'_>) -> Result<Vec<u8>, CompileError> + Send + Sync,
{
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileError> {
        self(request)
    }
}
