//! Transitive source fingerprints of callables.
//!
//! The fingerprint of a callable digests its own normalized fragment followed
//! by the fingerprints of every callable it invokes, in call-appearance order.
//! Calls matching the trusted-runtime table are not walked. A callee already
//! visited in the same computation contributes only once, which also breaks
//! cycles.

use crate::callable::{Binding, CallClass, CallTarget, CallableDef, CallableRegistry};
use crate::error::FingerprintError;
use kcache_common::{ContentHash, ContentHasher, Ident};
use kcache_config::TrustedRuntime;
use kcache_source::{
    call_sites, fragment_digest, local_bindings, name_references, tokenize, SourceDb,
    SourceLocation, Token,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// The digest of one visited fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHash {
    /// Where the fragment lives.
    pub location: SourceLocation,
    /// [`fragment_digest`] of the fragment text.
    pub hash: ContentHash,
}

/// Result of fingerprinting one callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprint {
    /// Digest over the whole reachable call graph.
    pub digest: ContentHash,
    /// Every visited fragment, root first, in depth-first pre-order.
    pub fragments: Vec<FragmentHash>,
}

/// Computes and memoizes source fingerprints.
///
/// Only completed top-level results are memoized, never partial results from
/// inside a walk, so a fingerprint does not depend on which callable happened
/// to be fingerprinted first.
pub struct SourceFingerprinter {
    trusted: TrustedRuntime,
    memo: RwLock<HashMap<Ident, Arc<SourceFingerprint>>>,
}

impl SourceFingerprinter {
    /// Creates a fingerprinter that skips calls matched by `trusted`.
    pub fn new(trusted: TrustedRuntime) -> Self {
        Self {
            trusted,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// The trusted-runtime table in use.
    pub fn trusted(&self) -> &TrustedRuntime {
        &self.trusted
    }

    /// Returns the fingerprint of `callable`, computing it on first request.
    pub fn fingerprint(
        &self,
        registry: &CallableRegistry,
        callable: Ident,
    ) -> Result<Arc<SourceFingerprint>, FingerprintError> {
        if let Some(hit) = self
            .memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&callable)
        {
            return Ok(Arc::clone(hit));
        }

        let mut walk = Walk {
            registry,
            trusted: &self.trusted,
            db: SourceDb::new(),
            visited: HashSet::from([callable]),
            fragments: Vec::new(),
        };
        let digest = walk.visit(callable)?;
        let result = Arc::new(SourceFingerprint {
            digest,
            fragments: walk.fragments,
        });
        debug!(
            "source fingerprint of {} is {} over {} fragment(s) in {} file(s)",
            registry.try_name(callable).unwrap_or("?"),
            result.digest,
            result.fragments.len(),
            walk.db.len()
        );
        self.memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callable, Arc::clone(&result));
        Ok(result)
    }

    /// Drops the memoized fingerprint of `callable`.
    pub fn forget(&self, callable: Ident) {
        self.memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&callable);
    }

    /// Drops every memoized fingerprint.
    pub fn clear(&self) {
        self.memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of memoized fingerprints.
    pub fn memoized(&self) -> usize {
        self.memo
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

struct Walk<'r> {
    registry: &'r CallableRegistry,
    trusted: &'r TrustedRuntime,
    db: SourceDb,
    visited: HashSet<Ident>,
    fragments: Vec<FragmentHash>,
}

impl Walk<'_> {
    fn visit(&mut self, id: Ident) -> Result<ContentHash, FingerprintError> {
        let def = self
            .registry
            .get(id)
            .ok_or_else(|| FingerprintError::UnknownCallable {
                name: self
                    .registry
                    .try_name(id)
                    .map_or_else(|| format!("#{}", id.as_raw()), str::to_string),
            })?;
        let text = self
            .db
            .fragment(&def.location)
            .map_err(|source| FingerprintError::Source {
                callable: def.qualified_name(),
                source,
            })?
            .to_string();

        let own = fragment_digest(&text);
        self.fragments.push(FragmentHash {
            location: def.location.clone(),
            hash: own,
        });

        let tokens = tokenize(&text);
        check_captures(self.registry, &def, &tokens)?;

        let mut hasher = ContentHasher::new();
        hasher.update_hash(&own);
        let mut seen = HashSet::new();
        for site in call_sites(&tokens) {
            if !seen.insert(site.path.clone()) {
                continue;
            }
            let callee = match self.registry.classify_call(&def, &site.path, self.trusted) {
                CallClass::Trusted => continue,
                CallClass::Target(CallTarget::LocalCapture { callable, .. })
                | CallClass::Target(CallTarget::ModuleQualified { callable, .. }) => callable,
                CallClass::Target(CallTarget::Unresolvable { reason }) => {
                    return Err(FingerprintError::Unresolvable {
                        callable: def.qualified_name(),
                        call: site.path,
                        reason,
                    });
                }
            };
            if self.visited.insert(callee) {
                let sub = self.visit(callee)?;
                hasher.update_hash(&sub);
            }
        }
        Ok(hasher.finish())
    }
}

/// Rejects references to mutable bindings that are neither declared
/// parameters nor bound inside the fragment.
fn check_captures(
    registry: &CallableRegistry,
    def: &CallableDef,
    tokens: &[Token<'_>],
) -> Result<(), FingerprintError> {
    let locals = local_bindings(tokens);
    for name_ref in name_references(tokens) {
        if def.signature.declares(&name_ref.name) || locals.contains(&name_ref.name) {
            continue;
        }
        if let Some(Binding::Mutable) = registry.binding_for(def, &name_ref.name) {
            return Err(FingerprintError::ImpureCapture {
                callable: def.qualified_name(),
                symbol: name_ref.name,
                location: def.location.clone(),
            });
        }
    }
    Ok(())
}
