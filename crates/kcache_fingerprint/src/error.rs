//! Error types for fingerprint computation.

use kcache_source::{SourceError, SourceLocation};

/// Errors produced while fingerprinting a callable or configuration.
///
/// Every variant except [`ImpureCapture`](Self::ImpureCapture) and
/// [`Config`](Self::Config) means "cannot prove reuse is safe": the caller
/// abstains from caching and compiles.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// A call in the walked graph does not resolve to registered source.
    #[error("call to `{call}` in `{callable}` cannot be resolved: {reason}")]
    Unresolvable {
        /// The calling callable.
        callable: String,
        /// The flattened call name.
        call: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A pure callable reads a mutable binding it does not receive as a parameter.
    #[error("pure callable `{callable}` reads mutable captured name `{symbol}` ({location})")]
    ImpureCapture {
        /// The offending callable.
        callable: String,
        /// The mutable name.
        symbol: String,
        /// Where the callable is defined.
        location: SourceLocation,
    },

    /// The source of a callable could not be read.
    #[error("cannot read source of `{callable}`: {source}")]
    Source {
        /// The callable whose source was requested.
        callable: String,
        /// The underlying error.
        source: SourceError,
    },

    /// The callable id does not belong to a registered callable.
    #[error("unknown callable `{name}`")]
    UnknownCallable {
        /// The name or id that failed to resolve.
        name: String,
    },

    /// The configuration could not be serialized for fingerprinting.
    #[error("cannot serialize configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl FingerprintError {
    /// Returns `true` if the caller should abstain (compile uncached) rather
    /// than fail the call.
    pub fn is_abstention(&self) -> bool {
        matches!(
            self,
            FingerprintError::Unresolvable { .. }
                | FingerprintError::Source { .. }
                | FingerprintError::UnknownCallable { .. }
        )
    }
}
