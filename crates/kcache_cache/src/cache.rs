//! The kernel cache: resolves a call to a compiled artifact.
//!
//! [`KernelCache::resolve`] decides between four outcomes:
//!
//! - `Hit`: an artifact for the cache key is already in memory, or a valid
//!   side-cache record and its artifact were found on disk.
//! - `Fresh`: no record existed; the callable was compiled and both the
//!   artifact and its record were written.
//! - `Invalidated`: a record existed but a fragment it covers changed (or
//!   its artifact is gone); the callable was recompiled and rewritten.
//! - `Abstained`: caching was disabled, the callable is impure, or a
//!   fingerprint could not be computed. The callable is compiled without
//!   touching persistent storage and kept only for this process, keyed by
//!   its specialization.
//!
//! A record is always written after its artifact, so a reader never finds a
//! record pointing at nothing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use kcache_common::{ContentHash, Ident, LogicalId};
use kcache_config::{CacheSettings, CompileConfig, KcacheConfig, TrustedRuntime};
use kcache_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink};
use kcache_fingerprint::{
    specialize, ArgStats, ArgValue, ArgumentDescriptor, ArgumentFingerprinter, Binding, CacheKey,
    CallableDef, CallableRegistry, ConfigFingerprinter, FingerprintError, Purity,
    SourceFingerprint, SourceFingerprinter,
};
use log::{debug, info, warn};

use crate::artifact::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use crate::backend::{CompileRequest, CompilerBackend};
use crate::error::ResolveError;
use crate::side_cache::{CacheRecord, SideCache};
use crate::specialization::{InvalidationCallback, SpecializationMapper};

/// Compiled artifact bytes, shared between callers.
pub type Artifact = Arc<[u8]>;

/// How a call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOutcome {
    /// Compiled because no record existed.
    Fresh,
    /// Served without compiling.
    Hit,
    /// Recompiled because the record no longer matched.
    Invalidated,
    /// Compiled without persistent caching.
    Abstained,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheOutcome::Fresh => "fresh",
            CacheOutcome::Hit => "hit",
            CacheOutcome::Invalidated => "invalidated",
            CacheOutcome::Abstained => "abstained",
        })
    }
}

/// The result of resolving one call.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The artifact to launch.
    pub artifact: Artifact,
    /// How it was obtained.
    pub outcome: CacheOutcome,
    /// The cache key, when one was computed.
    pub key: Option<CacheKey>,
    /// The specialization id, when caching was enabled.
    pub specialization: Option<u32>,
}

/// Outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// [`CacheOutcome::Fresh`] count.
    pub fresh: u64,
    /// [`CacheOutcome::Hit`] count.
    pub hits: u64,
    /// [`CacheOutcome::Invalidated`] count.
    pub invalidated: u64,
    /// [`CacheOutcome::Abstained`] count.
    pub abstained: u64,
}

impl CacheStats {
    /// Total number of resolved calls.
    pub fn total(&self) -> u64 {
        self.fresh + self.hits + self.invalidated + self.abstained
    }
}

#[derive(Default)]
struct Counters {
    fresh: AtomicU64,
    hits: AtomicU64,
    invalidated: AtomicU64,
    abstained: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Fresh => &self.fresh,
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Invalidated => &self.invalidated,
            CacheOutcome::Abstained => &self.abstained,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            fresh: self.fresh.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            abstained: self.abstained.load(Ordering::Relaxed),
        }
    }
}

/// `(callable, specialization id, config digest)`.
type VariantKey = (Ident, u32, ContentHash);

enum KeyError {
    Abstain(String),
    Fail(ResolveError),
}

/// Resolves calls of registered callables to compiled artifacts.
///
/// All methods take `&self`; the cache is safe to share between threads.
/// Concurrent misses on the same key may both compile; the writes are
/// idempotent.
pub struct KernelCache {
    settings: CacheSettings,
    registry: CallableRegistry,
    sources: SourceFingerprinter,
    args: ArgumentFingerprinter,
    mapper: SpecializationMapper,
    side_cache: SideCache,
    store: Box<dyn ArtifactStore>,
    backend: Box<dyn CompilerBackend>,
    compiled: RwLock<HashMap<CacheKey, Artifact>>,
    variants: RwLock<HashMap<VariantKey, Artifact>>,
    last_outcome: RwLock<HashMap<Ident, CacheOutcome>>,
    warned: Mutex<HashSet<Ident>>,
    diagnostics: DiagnosticSink,
    counters: Counters,
}

impl KernelCache {
    /// Creates a cache from loaded configuration.
    ///
    /// With `cache.offline` set, artifacts and records persist under
    /// `cache.dir`; otherwise both live in memory.
    pub fn new(config: &KcacheConfig, backend: impl CompilerBackend + 'static) -> Self {
        let settings = &config.cache;
        let (store, side_cache): (Box<dyn ArtifactStore>, SideCache) = if settings.offline {
            (
                Box::new(FsArtifactStore::new(&settings.dir)),
                SideCache::on_disk(&settings.dir),
            )
        } else {
            (Box::new(MemoryArtifactStore::new()), SideCache::in_memory())
        };
        info!(
            "kernel cache {} ({})",
            if settings.enabled { "enabled" } else { "disabled" },
            if settings.offline {
                settings.dir.display().to_string()
            } else {
                "in memory".to_string()
            }
        );
        Self::with_parts(
            settings.clone(),
            config.trusted.clone(),
            store,
            side_cache,
            Box::new(backend),
        )
    }

    /// Creates a cache from explicit parts.
    pub fn with_parts(
        settings: CacheSettings,
        trusted: TrustedRuntime,
        store: Box<dyn ArtifactStore>,
        side_cache: SideCache,
        backend: Box<dyn CompilerBackend>,
    ) -> Self {
        Self {
            settings,
            registry: CallableRegistry::new(),
            sources: SourceFingerprinter::new(trusted),
            args: ArgumentFingerprinter::new(),
            mapper: SpecializationMapper::new(),
            side_cache,
            store,
            backend,
            compiled: RwLock::new(HashMap::new()),
            variants: RwLock::new(HashMap::new()),
            last_outcome: RwLock::new(HashMap::new()),
            warned: Mutex::new(HashSet::new()),
            diagnostics: DiagnosticSink::new(),
            counters: Counters::default(),
        }
    }

    /// Registers (or replaces) a callable.
    ///
    /// Replacing a callable discards its specializations and in-process
    /// variants. Memoized source fingerprints are dropped since callers may
    /// reach the replaced callable.
    pub fn register(&self, def: CallableDef) -> Ident {
        let id = self.registry.register(def);
        self.mapper.unregister(id);
        self.mapper.register(id);
        self.drop_variants(|(callable, _, _)| *callable == id);
        self.sources.clear();
        debug!("registered {}", self.registry.name(id));
        id
    }

    /// Unregisters a callable. Returns `false` if it was not registered.
    pub fn unregister(&self, id: Ident) -> bool {
        if !self.registry.unregister(id) {
            return false;
        }
        self.mapper.unregister(id);
        self.drop_variants(|(callable, _, _)| *callable == id);
        self.sources.clear();
        self.last_outcome
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        true
    }

    /// Binds a module-level name visible to callables of `module`.
    pub fn define_global(&self, module: &str, name: &str, binding: Binding) {
        self.registry.define_global(module, name, binding);
        self.sources.clear();
    }

    /// Returns the id of a registered callable by qualified name.
    pub fn lookup(&self, name: &str) -> Option<Ident> {
        self.registry.lookup(name)
    }

    /// The callable registry.
    pub fn registry(&self) -> &CallableRegistry {
        &self.registry
    }

    /// The cache settings in effect.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Diagnostics emitted so far.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// Resolves a call of `callable` with `args` under `config`.
    pub fn resolve(
        &self,
        callable: Ident,
        args: &[ArgValue],
        config: &CompileConfig,
    ) -> Result<Resolution, ResolveError> {
        let def = self
            .registry
            .get(callable)
            .ok_or_else(|| self.unknown(callable))?;
        let descriptors = ArgumentFingerprinter::describe_all(&def.signature, args);

        if !self.settings.enabled {
            let artifact = self.compile(&def, None, &descriptors, config)?;
            return Ok(self.finish(callable, artifact, CacheOutcome::Abstained, None, None));
        }

        let spec = specialize(&def.signature, args).map_err(|source| {
            ResolveError::Specialization {
                callable: def.qualified_name(),
                source,
            }
        })?;
        let shareable = spec.key.is_shareable();
        let spec_id = self
            .mapper
            .lookup(callable, spec)
            .ok_or_else(|| self.unknown(callable))?;
        let config_digest =
            ConfigFingerprinter::fingerprint(config).map_err(ResolveError::Fingerprint)?;
        let variant = (callable, spec_id, config_digest);

        if def.purity == Purity::Impure {
            return self.resolve_uncached(&def, variant, shareable, &descriptors, config, || {
                "it is declared impure".to_string()
            });
        }

        let (key, source) = match self.cache_key(callable, &def, args, config_digest) {
            Ok(found) => found,
            Err(KeyError::Abstain(reason)) => {
                return self.resolve_uncached(&def, variant, shareable, &descriptors, config, || reason)
            }
            Err(KeyError::Fail(e)) => return Err(e),
        };

        if let Some(artifact) = self.compiled_artifact(&key) {
            return Ok(self.finish(callable, artifact, CacheOutcome::Hit, Some(key), Some(spec_id)));
        }

        let outcome = match self.side_cache.load(&key) {
            None => CacheOutcome::Fresh,
            Some(record) => {
                if SideCache::validate(&record) {
                    if let Some(bytes) = self.store.get(&record.artifact) {
                        let artifact: Artifact = bytes.into();
                        self.remember(key, &artifact);
                        return Ok(self.finish(
                            callable,
                            artifact,
                            CacheOutcome::Hit,
                            Some(key),
                            Some(spec_id),
                        ));
                    }
                    debug!("record {key} has no readable artifact");
                } else {
                    warn!("cache record {key} of {} is stale", def.qualified_name());
                    self.diagnostics.emit(
                        Diagnostic::warning(
                            DiagnosticCode::STALE_RECORD,
                            format!("cached kernel for `{}` is out of date", def.qualified_name()),
                        )
                        .with_location(def.location.clone())
                        .with_note(format!("recompiling under key {key}")),
                    );
                    self.sources.forget(callable);
                }
                CacheOutcome::Invalidated
            }
        };

        let artifact = self.compile(&def, Some(key), &descriptors, config)?;
        info!("compiled {} under key {key} ({outcome})", def.qualified_name());
        self.persist(&def, key, &source, &artifact);
        self.remember(key, &artifact);
        Ok(self.finish(callable, artifact, outcome, Some(key), Some(spec_id)))
    }

    /// Resolves a call by qualified callable name.
    pub fn resolve_by_name(
        &self,
        name: &str,
        args: &[ArgValue],
        config: &CompileConfig,
    ) -> Result<Resolution, ResolveError> {
        let id = self
            .registry
            .lookup(name)
            .ok_or_else(|| ResolveError::UnknownCallable {
                name: name.to_string(),
            })?;
        self.resolve(id, args, config)
    }

    /// The outcome of the most recent call of `callable`.
    pub fn last_outcome(&self, callable: Ident) -> Option<CacheOutcome> {
        self.last_outcome
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&callable)
            .copied()
    }

    /// Outcome counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Argument-fingerprinting counters.
    pub fn arg_stats(&self) -> ArgStats {
        self.args.stats()
    }

    /// Returns `true` if a record for `key` exists and still matches source.
    pub fn validate(&self, key: &CacheKey) -> bool {
        self.side_cache.validate_key(key)
    }

    /// Installs a callback run for every invalidated specialization.
    pub fn set_invalidation_callback(&self, callback: InvalidationCallback) {
        self.mapper.set_invalidation_callback(callback);
    }

    /// Retires every specialization that names the object `id`. Returns the
    /// number retired.
    pub fn invalidate_object(&self, id: LogicalId) -> usize {
        let retired = self.mapper.invalidate_object(id);
        self.drop_retired(&retired);
        retired.len()
    }

    /// Retires every specialization holding an object that has been dropped.
    pub fn prune_dead(&self) -> usize {
        let retired = self.mapper.prune_dead();
        self.drop_retired(&retired);
        retired.len()
    }

    /// Drops all in-process state tied to logical ids and source contents:
    /// specializations, variants, memoized fingerprints and compiled
    /// artifacts. Persistent records are kept. Call after resetting the
    /// [`Epoch`](kcache_common::Epoch) that allocates structural ids.
    pub fn clear_in_process(&self) {
        self.mapper.clear();
        self.variants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.sources.clear();
        self.warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cache_key(
        &self,
        callable: Ident,
        def: &CallableDef,
        args: &[ArgValue],
        config_digest: ContentHash,
    ) -> Result<(CacheKey, Arc<SourceFingerprint>), KeyError> {
        let args_digest = self
            .args
            .fingerprint(&def.signature, args)
            .ok_or_else(|| KeyError::Abstain("an argument cannot be fingerprinted".to_string()))?;

        let source = match self.sources.fingerprint(&self.registry, callable) {
            Ok(source) => source,
            Err(e) if e.is_abstention() => return Err(KeyError::Abstain(e.to_string())),
            Err(e) => {
                if let FingerprintError::ImpureCapture {
                    symbol, location, ..
                } = &e
                {
                    self.diagnostics.emit(
                        Diagnostic::error(DiagnosticCode::IMPURE_CAPTURE, e.to_string())
                            .with_location(location.clone())
                            .with_help(format!(
                                "pass `{symbol}` as a parameter or mark the callable impure"
                            )),
                    );
                }
                return Err(KeyError::Fail(ResolveError::Fingerprint(e)));
            }
        };

        let key = CacheKey::compose(&source.digest, &args_digest, &config_digest, def.purity);
        Ok((key, source))
    }

    /// Serves a call from the in-process variant map. A variant whose key is
    /// not shareable is compiled for every call and never stored.
    fn resolve_uncached(
        &self,
        def: &CallableDef,
        variant: VariantKey,
        shareable: bool,
        descriptors: &[ArgumentDescriptor],
        config: &CompileConfig,
        reason: impl FnOnce() -> String,
    ) -> Result<Resolution, ResolveError> {
        let (callable, spec_id, _) = variant;
        let existing = if shareable {
            self.variants
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&variant)
                .cloned()
        } else {
            None
        };
        if let Some(artifact) = existing {
            return Ok(self.finish(callable, artifact, CacheOutcome::Hit, None, Some(spec_id)));
        }

        self.note_abstention(callable, def, reason());
        let artifact = self.compile(def, None, descriptors, config)?;
        if shareable {
            self.variants
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(variant, Arc::clone(&artifact));
        }
        Ok(self.finish(callable, artifact, CacheOutcome::Abstained, None, Some(spec_id)))
    }

    fn note_abstention(&self, callable: Ident, def: &CallableDef, reason: String) {
        let first = self
            .warned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callable);
        if !first {
            return;
        }
        warn!("not caching {}: {reason}", def.qualified_name());
        self.diagnostics.emit(
            Diagnostic::warning(
                DiagnosticCode::ABSTAINED,
                format!("`{}` is compiled without caching", def.qualified_name()),
            )
            .with_location(def.location.clone())
            .with_note(reason),
        );
    }

    fn compile(
        &self,
        def: &CallableDef,
        key: Option<CacheKey>,
        descriptors: &[ArgumentDescriptor],
        config: &CompileConfig,
    ) -> Result<Artifact, ResolveError> {
        let started = Instant::now();
        let request = CompileRequest {
            callable: def,
            key,
            descriptors,
            config,
        };
        let bytes = self
            .backend
            .compile(&request)
            .map_err(|source| ResolveError::Compile {
                callable: def.qualified_name(),
                source,
            })?;
        debug!(
            "compiled {} ({} bytes) in {:.1?}",
            def.qualified_name(),
            bytes.len(),
            started.elapsed()
        );
        Ok(bytes.into())
    }

    /// Artifact first, then the record that points at it. Failures are logged
    /// and leave the call uncached on disk.
    fn persist(&self, def: &CallableDef, key: CacheKey, source: &SourceFingerprint, artifact: &[u8]) {
        if let Err(e) = self.store.put(&key, artifact) {
            warn!("cannot store artifact {key}: {e}");
            return;
        }
        let record = CacheRecord::new(key, def.qualified_name(), source.fragments.clone());
        if let Err(e) = self.side_cache.store(&record) {
            warn!("cannot store cache record {key}: {e}");
        }
    }

    fn compiled_artifact(&self, key: &CacheKey) -> Option<Artifact> {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember(&self, key: CacheKey, artifact: &Artifact) {
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(artifact));
    }

    fn finish(
        &self,
        callable: Ident,
        artifact: Artifact,
        outcome: CacheOutcome,
        key: Option<CacheKey>,
        specialization: Option<u32>,
    ) -> Resolution {
        self.counters.record(outcome);
        self.last_outcome
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callable, outcome);
        debug!("{} -> {outcome}", self.registry.name(callable));
        Resolution {
            artifact,
            outcome,
            key,
            specialization,
        }
    }

    fn drop_retired(&self, retired: &[(Ident, u32)]) {
        if retired.is_empty() {
            return;
        }
        let retired: HashSet<(Ident, u32)> = retired.iter().copied().collect();
        self.drop_variants(|(callable, id, _)| retired.contains(&(*callable, *id)));
    }

    fn drop_variants(&self, pred: impl Fn(&VariantKey) -> bool) {
        self.variants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k, _| !pred(k));
    }

    fn unknown(&self, callable: Ident) -> ResolveError {
        ResolveError::UnknownCallable {
            name: self
                .registry
                .try_name(callable)
                .map_or_else(|| format!("#{}", callable.as_raw()), str::to_string),
        }
    }
}
