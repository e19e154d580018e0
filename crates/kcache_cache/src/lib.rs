//! Kernel compilation cache.
//!
//! [`KernelCache`] sits between a kernel launcher and a compiler backend. A
//! call is fingerprinted (source, arguments, configuration), and the
//! resulting [`CacheKey`](kcache_fingerprint::CacheKey) selects a stored
//! artifact when the side-cache record for it still matches the source on
//! disk. Calls that cannot be fingerprinted are compiled without caching and
//! kept per specialization for the life of the process.

#![warn(missing_docs)]

pub mod artifact;
pub mod backend;
pub mod cache;
pub mod error;
pub mod side_cache;
pub mod specialization;

pub use artifact::{ArtifactHeader, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use backend::{CompileError, CompileRequest, CompilerBackend};
pub use cache::{Artifact, CacheOutcome, CacheStats, KernelCache, Resolution};
pub use error::{CacheError, ResolveError};
pub use side_cache::{CacheRecord, SideCache, RECORD_FORMAT_VERSION};
pub use specialization::{InvalidationCallback, SpecializationMapper};
