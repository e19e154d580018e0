//! Fingerprints of callables, arguments and compiler configuration.
//!
//! A cache key is composed from three independent digests:
//!
//! - [`SourceFingerprinter`] walks a callable's call graph through the
//!   [`CallableRegistry`] and digests every reachable fragment.
//! - [`ArgumentFingerprinter`] digests the structural descriptors of the call
//!   arguments; value parameters contribute their type shape only.
//! - [`ConfigFingerprinter`] digests the compiler configuration.
//!
//! [`CacheKey::compose`] combines them with the callable's [`Purity`].
//! [`specialize`] computes the in-process variant key of a call.

#![warn(missing_docs)]

pub mod args;
pub mod callable;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod key;
pub mod source;
pub mod specialize;
pub mod value;

pub use args::{ArgStats, ArgumentFingerprinter};
pub use callable::{
    Binding, CallClass, CallTarget, CallableDef, CallableRegistry, Param, ParamKind, Purity,
    Signature,
};
pub use config::{ConfigFingerprinter, FingerprintConfig};
pub use descriptor::{describe, ArgumentDescriptor, Layout};
pub use error::FingerprintError;
pub use key::CacheKey;
pub use source::{FragmentHash, SourceFingerprint, SourceFingerprinter};
pub use specialize::{
    specialize, Discriminator, Specialization, SpecializationError, SpecializationKey,
};
pub use value::{
    ArgValue, ArrayArg, ArrayKind, Dtype, EnumArg, Record, RecordField, Scalar, StructuralObject,
    WeakObject,
};
