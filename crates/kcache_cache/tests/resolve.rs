//! End-to-end resolution against an on-disk cache directory.
//!
//! Each `KernelCache` built over the same directory stands in for a separate
//! process: in-memory state starts empty, records and artifacts persist.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kcache_cache::{
    CacheOutcome, CacheRecord, CompileError, CompileRequest, CompilerBackend, KernelCache,
    ResolveError, SideCache,
};
use kcache_common::ContentHash;
use kcache_config::{CacheSettings, CompileConfig, KcacheConfig};
use kcache_diagnostics::DiagnosticCode;
use kcache_fingerprint::{ArgValue, ArrayArg, Binding, CallableDef, Dtype, Scalar, Signature};
use kcache_source::SourceLocation;

const KERNELS: &str = "\
def helper(v):
    return v * 2

def unrelated():
    return 1

def kernel(a, x):
    for i in range(len(x)):
        x[i] = helper(a) + ti.sqrt(a)
";

struct Backend {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CompilerBackend for Backend {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CompileError::new("backend rejected kernel"));
        }
        let key = request.key.map(|k| k.to_string()).unwrap_or_default();
        Ok(format!("{}:{}:{}", request.callable.name, request.descriptors.len(), key).into_bytes())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let fx = Self {
            dir: tempfile::tempdir().unwrap(),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        fx.write("kernels.py", KERNELS);
        fx
    }

    fn write(&self, file: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn config(&self, enabled: bool) -> KcacheConfig {
        KcacheConfig {
            cache: CacheSettings {
                enabled,
                offline: true,
                dir: self.cache_dir(),
            },
            ..KcacheConfig::default()
        }
    }

    /// A fresh "process" over the shared cache directory.
    fn process(&self) -> KernelCache {
        self.process_with(true, false)
    }

    fn process_with(&self, enabled: bool, fail: bool) -> KernelCache {
        let cache = KernelCache::new(
            &self.config(enabled),
            Backend {
                calls: Arc::clone(&self.calls),
                fail,
            },
        );
        let file = self.dir.path().join("kernels.py");
        let loc = |s, e| SourceLocation::new("", &file, s, e);
        cache.register(CallableDef::new("kernels", "helper", loc(1, 2)));
        cache.register(CallableDef::new("kernels", "unrelated", loc(4, 5)));
        cache.register(
            CallableDef::new("kernels", "kernel", loc(7, 9))
                .with_signature(Signature::new().value("a").value("x")),
        );
        cache
    }

    fn compiles(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn files_in(&self, subdir: &str) -> usize {
        count_files(&self.cache_dir().join(subdir))
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| entries.count())
}

fn args(a: i32, shape: Vec<usize>) -> [ArgValue; 2] {
    [
        Scalar::I32(a).into(),
        ArrayArg::ndarray(Dtype::F32, shape).into(),
    ]
}

#[test]
fn value_scalars_share_an_artifact() {
    let fx = Fixture::new();
    let cache = fx.process();
    let config = CompileConfig::default();

    let first = cache.resolve_by_name("kernels.kernel", &args(5, vec![16]), &config).unwrap();
    let second = cache.resolve_by_name("kernels.kernel", &args(9, vec![32]), &config).unwrap();

    assert_eq!(first.outcome, CacheOutcome::Fresh);
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(first.key, second.key);
    assert_eq!(fx.compiles(), 1);
    assert_eq!(fx.files_in("artifacts"), 1);
    assert_eq!(fx.files_in("side"), 1);
}

#[test]
fn array_rank_selects_a_new_artifact() {
    let fx = Fixture::new();
    let cache = fx.process();
    let config = CompileConfig::default();

    let rank1 = cache.resolve_by_name("kernels.kernel", &args(1, vec![4]), &config).unwrap();
    let rank2 = cache.resolve_by_name("kernels.kernel", &args(1, vec![4, 4]), &config).unwrap();

    assert_eq!(rank2.outcome, CacheOutcome::Fresh);
    assert_ne!(rank1.key, rank2.key);
    assert_ne!(rank1.specialization, rank2.specialization);
    assert_eq!(fx.files_in("artifacts"), 2);
}

#[test]
fn later_process_hits_from_disk() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    let first = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();

    let second = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(2, vec![8]), &config)
        .unwrap();
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert_eq!(second.artifact, first.artifact);
    assert_eq!(fx.compiles(), 1);
}

#[test]
fn unrelated_edits_keep_records_valid() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    let key = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap()
        .key
        .unwrap();

    fx.write("kernels.py", &KERNELS.replace("return 1", "return 2"));
    let cache = fx.process();
    assert!(cache.validate(&key));
    let again = cache
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    assert_eq!(again.outcome, CacheOutcome::Hit);
    assert_eq!(fx.compiles(), 1);
}

#[test]
fn callee_edits_change_the_key() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    let old = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap()
        .key
        .unwrap();

    fx.write("kernels.py", &KERNELS.replace("v * 2", "v * 3"));
    let cache = fx.process();
    assert!(!cache.validate(&old));
    let new = cache
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    assert_eq!(new.outcome, CacheOutcome::Fresh);
    assert_ne!(new.key, Some(old));
    assert_eq!(fx.compiles(), 2);
}

#[test]
fn reformatting_does_not_change_the_key() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    let old = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();

    fx.write("kernels.py", &KERNELS.replace("helper(a) + ti.sqrt(a)", "helper( a )+ti.sqrt(a)"));
    let new = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    assert_eq!(new.outcome, CacheOutcome::Hit);
    assert_eq!(new.key, old.key);
}

#[test]
fn stale_record_is_invalidated() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    let key = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap()
        .key
        .unwrap();

    let side = SideCache::on_disk(&fx.cache_dir());
    let mut record: CacheRecord = side.load(&key).unwrap();
    record.fragments[0].hash = ContentHash::from_str_content("something else");
    side.store(&record).unwrap();

    let cache = fx.process();
    let r = cache
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    assert_eq!(r.outcome, CacheOutcome::Invalidated);
    assert_eq!(fx.compiles(), 2);
    assert_eq!(cache.diagnostics().count_code(DiagnosticCode::STALE_RECORD), 1);
    assert!(cache.validate(&key));
}

#[test]
fn missing_artifact_is_invalidated() {
    let fx = Fixture::new();
    let config = CompileConfig::default();
    fx.process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    for entry in std::fs::read_dir(fx.cache_dir().join("artifacts")).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let r = fx
        .process()
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
        .unwrap();
    assert_eq!(r.outcome, CacheOutcome::Invalidated);
    assert_eq!(fx.files_in("artifacts"), 1);
}

#[test]
fn disabled_cache_writes_nothing() {
    let fx = Fixture::new();
    let cache = fx.process_with(false, false);
    let config = CompileConfig::default();
    for _ in 0..2 {
        let r = cache
            .resolve_by_name("kernels.kernel", &args(1, vec![4]), &config)
            .unwrap();
        assert_eq!(r.outcome, CacheOutcome::Abstained);
    }
    assert_eq!(fx.compiles(), 2);
    assert!(!fx.cache_dir().exists());
}

#[test]
fn compile_failure_writes_nothing() {
    let fx = Fixture::new();
    let cache = fx.process_with(true, true);
    let err = cache
        .resolve_by_name("kernels.kernel", &args(1, vec![4]), &CompileConfig::default())
        .unwrap_err();
    match err {
        ResolveError::Compile { callable, source } => {
            assert_eq!(callable, "kernels.kernel");
            assert_eq!(source.message, "backend rejected kernel");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.files_in("artifacts"), 0);
    assert_eq!(fx.files_in("side"), 0);
}

#[test]
fn impure_capture_is_an_error() {
    let fx = Fixture::new();
    let path = fx.write("leaky.py", "def leaky(x):\n    x[0] = state\n");
    let cache = fx.process();
    cache.define_global("leaky", "state", Binding::Mutable);
    cache.register(
        CallableDef::new("leaky", "leaky", SourceLocation::new("", path, 1, 2))
            .with_signature(Signature::new().value("x")),
    );

    let x: ArgValue = ArrayArg::ndarray(Dtype::F32, vec![1]).into();
    let err = cache
        .resolve_by_name("leaky.leaky", &[x], &CompileConfig::default())
        .unwrap_err();
    assert!(matches!(err, ResolveError::Fingerprint(_)));
    assert_eq!(fx.compiles(), 0);
    assert_eq!(cache.diagnostics().count_code(DiagnosticCode::IMPURE_CAPTURE), 1);
    assert!(cache.diagnostics().has_errors());
}

#[test]
fn unresolvable_calls_abstain_once() {
    let fx = Fixture::new();
    let path = fx.write("opaque.py", "def opaque(x):\n    x[0] = mystery(1)\n");
    let cache = fx.process();
    let id = cache.register(
        CallableDef::new("opaque", "opaque", SourceLocation::new("", path, 1, 2))
            .with_signature(Signature::new().value("x")),
    );
    let config = CompileConfig::default();
    let x = || -> [ArgValue; 1] { [ArrayArg::ndarray(Dtype::F32, vec![1]).into()] };

    let first = cache.resolve(id, &x(), &config).unwrap();
    let second = cache.resolve(id, &x(), &config).unwrap();
    assert_eq!(first.outcome, CacheOutcome::Abstained);
    assert_eq!(second.outcome, CacheOutcome::Hit);
    assert!(first.key.is_none());
    assert_eq!(fx.compiles(), 1);
    assert_eq!(cache.diagnostics().count_code(DiagnosticCode::ABSTAINED), 1);
    assert_eq!(fx.files_in("side"), 0);

    // a new process compiles again
    let other = fx.process();
    let id = other.register(
        CallableDef::new("opaque", "opaque", SourceLocation::new("", fx.dir.path().join("opaque.py"), 1, 2))
            .with_signature(Signature::new().value("x")),
    );
    assert_eq!(other.resolve(id, &x(), &config).unwrap().outcome, CacheOutcome::Abstained);
    assert_eq!(fx.compiles(), 2);
}

#[test]
fn config_changes_select_new_artifacts() {
    let fx = Fixture::new();
    let cache = fx.process();
    let base = CompileConfig::default();
    let tagged = CompileConfig {
        session_tag: Some("run-42".to_string()),
        ..CompileConfig::default()
    };
    let fast = CompileConfig {
        opt_level: 3,
        ..CompileConfig::default()
    };

    let a = cache.resolve_by_name("kernels.kernel", &args(1, vec![4]), &base).unwrap();
    let b = cache.resolve_by_name("kernels.kernel", &args(1, vec![4]), &tagged).unwrap();
    let c = cache.resolve_by_name("kernels.kernel", &args(1, vec![4]), &fast).unwrap();
    assert_eq!(a.key, b.key);
    assert_eq!(b.outcome, CacheOutcome::Hit);
    assert_ne!(a.key, c.key);
    assert_eq!(c.outcome, CacheOutcome::Fresh);
}

#[test]
fn structural_scalars_are_compiled_in() {
    let fx = Fixture::new();
    let path = fx.write("unroll.py", "def unroll(n, x):\n    for i in static(range(n)):\n        x[i] = 0\n");
    let cache = fx.process();
    let id = cache.register(
        CallableDef::new("unroll", "unroll", SourceLocation::new("", path, 1, 3))
            .with_signature(Signature::new().structural("n").value("x")),
    );
    let config = CompileConfig::default();
    let call = |n: i32| -> [ArgValue; 2] {
        [Scalar::I32(n).into(), ArrayArg::ndarray(Dtype::F32, vec![8]).into()]
    };

    let three = cache.resolve(id, &call(3), &config).unwrap();
    let four = cache.resolve(id, &call(4), &config).unwrap();
    let three_again = cache.resolve(id, &call(3), &config).unwrap();
    assert_ne!(three.key, four.key);
    assert_eq!(four.outcome, CacheOutcome::Fresh);
    assert_eq!(three_again.outcome, CacheOutcome::Hit);
    assert_eq!(fx.compiles(), 2);
}

#[test]
fn stats_and_last_outcome() {
    let fx = Fixture::new();
    let cache = fx.process();
    let config = CompileConfig::default();
    let id = cache.lookup("kernels.kernel").unwrap();
    cache.resolve(id, &args(1, vec![4]), &config).unwrap();
    cache.resolve(id, &args(2, vec![4]), &config).unwrap();

    let stats = cache.stats();
    assert_eq!((stats.fresh, stats.hits), (1, 1));
    assert_eq!(cache.last_outcome(id), Some(CacheOutcome::Hit));
    assert_eq!(cache.arg_stats().calls, 2);
}

#[test]
fn trusted_methods_on_parameters_are_cached() {
    let fx = Fixture::new();
    let path = fx.write("fill.py", "def fill(x, v):\n    x.fill(0)\n    x[0] = v.norm()\n");
    let register = |cache: &KernelCache| {
        cache.register(
            CallableDef::new("fill", "fill", SourceLocation::new("", &path, 1, 3))
                .with_signature(Signature::new().value("x").value("v")),
        )
    };
    let config = CompileConfig::default();
    let call = || -> [ArgValue; 2] {
        [
            ArrayArg::ndarray(Dtype::F32, vec![8]).into(),
            ArrayArg::ndarray(Dtype::F32, vec![3]).into(),
        ]
    };

    let cache = fx.process();
    let id = register(&cache);
    let first = cache.resolve(id, &call(), &config).unwrap();
    assert_eq!(first.outcome, CacheOutcome::Fresh);
    assert!(first.key.is_some());

    let later = fx.process();
    let id = register(&later);
    assert_eq!(later.resolve(id, &call(), &config).unwrap().outcome, CacheOutcome::Hit);
    assert_eq!(fx.compiles(), 1);
}

#[test]
fn untrusted_method_on_parameter_abstains() {
    let fx = Fixture::new();
    let path = fx.write("push.py", "def push(x):\n    x.update(1)\n");
    let cache = fx.process();
    let id = cache.register(
        CallableDef::new("push", "push", SourceLocation::new("", path, 1, 2))
            .with_signature(Signature::new().value("x")),
    );
    let x: ArgValue = ArrayArg::ndarray(Dtype::F32, vec![1]).into();
    let r = cache.resolve(id, &[x], &CompileConfig::default()).unwrap();
    assert_eq!(r.outcome, CacheOutcome::Abstained);
    assert_eq!(cache.diagnostics().count_code(DiagnosticCode::ABSTAINED), 1);
}

#[test]
fn local_names_shadow_mutable_globals() {
    let fx = Fixture::new();
    let path = fx.write("local.py", "def local(x):\n    state = 2\n    x[0] = state\n");
    let cache = fx.process();
    cache.define_global("local", "state", Binding::Mutable);
    let id = cache.register(
        CallableDef::new("local", "local", SourceLocation::new("", path, 1, 3))
            .with_signature(Signature::new().value("x")),
    );
    let x: ArgValue = ArrayArg::ndarray(Dtype::F32, vec![1]).into();
    let r = cache.resolve(id, &[x], &CompileConfig::default()).unwrap();
    assert_eq!(r.outcome, CacheOutcome::Fresh);
    assert!(!cache.diagnostics().has_errors());
}

#[test]
fn concurrent_misses_agree() {
    let fx = Fixture::new();
    let cache = fx.process();
    let config = CompileConfig::default();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    cache
                        .resolve_by_name("kernels.kernel", &args(3, vec![16]), &config)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &results[0];
    for r in &results {
        assert_eq!(r.key, first.key);
        assert_eq!(r.artifact, first.artifact);
        assert_eq!(r.specialization, first.specialization);
        assert!(matches!(r.outcome, CacheOutcome::Fresh | CacheOutcome::Hit));
    }
    assert!((1..=8).contains(&fx.compiles()));
    assert_eq!(fx.files_in("artifacts"), 1);
    assert_eq!(fx.files_in("side"), 1);

    let key = first.key.unwrap();
    assert!(cache.validate(&key));
    let later = fx.process();
    let again = later
        .resolve_by_name("kernels.kernel", &args(3, vec![16]), &config)
        .unwrap();
    assert_eq!(again.outcome, CacheOutcome::Hit);
    assert_eq!(again.artifact, first.artifact);
}
