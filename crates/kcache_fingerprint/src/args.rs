//! Argument fingerprints.

use crate::callable::{ParamKind, Signature};
use crate::descriptor::{describe, ArgumentDescriptor};
use crate::specialize::specialize;
use crate::value::ArgValue;
use kcache_common::{ContentHash, ContentHasher};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of argument-fingerprinting counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgStats {
    /// Fingerprint requests.
    pub calls: u64,
    /// Arguments described across all requests.
    pub args: u64,
    /// Requests that returned `None`.
    pub abstained: u64,
}

/// Digests argument lists.
///
/// Value parameters are described by type shape; structural parameters
/// serialize their specialization discriminator, so the value of a structural
/// scalar and the identity of a structural object are part of the digest.
#[derive(Debug, Default)]
pub struct ArgumentFingerprinter {
    calls: AtomicU64,
    args: AtomicU64,
    abstained: AtomicU64,
}

impl ArgumentFingerprinter {
    /// Creates a fingerprinter with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Describes every argument, honoring each parameter's kind.
    ///
    /// Arguments beyond the signature are described as value parameters.
    /// Unrepresentable arguments stay in the list so a backend can still be
    /// told what it is compiling for.
    pub fn describe_all(signature: &Signature, values: &[ArgValue]) -> Vec<ArgumentDescriptor> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let structural = signature
                    .params
                    .get(i)
                    .is_some_and(|p| p.kind == ParamKind::Structural);
                describe(v, structural)
            })
            .collect()
    }

    /// Digests `values` against `signature`.
    ///
    /// Returns `None` as soon as one argument cannot be represented, or when
    /// the arguments do not fit the signature.
    pub fn fingerprint(&self, signature: &Signature, values: &[ArgValue]) -> Option<ContentHash> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.args.fetch_add(values.len() as u64, Ordering::Relaxed);
        let result = self.compute(signature, values);
        if result.is_none() {
            self.abstained.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn compute(&self, signature: &Signature, values: &[ArgValue]) -> Option<ContentHash> {
        let spec = match specialize(signature, values) {
            Ok(spec) => spec,
            Err(e) => {
                debug!("arguments not fingerprinted: {e}");
                return None;
            }
        };
        let mut hasher = ContentHasher::new();
        for (index, ((param, value), disc)) in signature
            .params
            .iter()
            .zip(values)
            .zip(&spec.key.0)
            .enumerate()
        {
            let text = match param.kind {
                ParamKind::Value => {
                    let d = describe(value, false);
                    if d.is_unrepresentable() {
                        debug!("argument {index} ({}) is unrepresentable", param.name);
                        return None;
                    }
                    d.to_string()
                }
                ParamKind::Structural => format!("{}|{disc}", describe(value, true)),
            };
            hasher.update(&(index as u64).to_le_bytes()).update_str(&text);
        }
        Some(hasher.finish())
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ArgStats {
        ArgStats {
            calls: self.calls.load(Ordering::Relaxed),
            args: self.args.load(Ordering::Relaxed),
            abstained: self.abstained.load(Ordering::Relaxed),
        }
    }

    /// Zeroes the counters.
    pub fn reset_stats(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.args.store(0, Ordering::Relaxed);
        self.abstained.store(0, Ordering::Relaxed);
    }
}
