//! Source fragments of kernel callables: locations, file loading, token
//! normalization and call-site discovery.
//!
//! A callable's source is a contiguous line range of a file, identified by a
//! [`SourceLocation`]. Fragments are hashed over a normalized token stream
//! ([`fragment_digest`]) so formatting changes do not invalidate caches while
//! every token change does.

#![warn(missing_docs)]

pub mod calls;
pub mod error;
pub mod location;
pub mod normalize;
pub mod source_db;
pub mod source_file;

pub use calls::{call_sites, local_bindings, name_references, CallSite, NameRef};
pub use error::SourceError;
pub use location::SourceLocation;
pub use normalize::{fragment_digest, tokenize, Token, TokenKind};
pub use source_db::{read_fragment, SourceDb};
pub use source_file::SourceFile;
