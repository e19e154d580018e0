//! Configuration types deserialized from `kcache.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The top-level configuration parsed from `kcache.toml`.
///
/// Every section is optional; an empty file yields [`KcacheConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct KcacheConfig {
    /// Cache toggles and the side-cache location.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Calls that are never followed while fingerprinting source.
    #[serde(default)]
    pub trusted: TrustedRuntime,
    /// The compiler configuration passed to the backend.
    #[serde(default)]
    pub compile: CompileConfig,
}

/// The `[cache]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    /// When `false`, every call compiles and reports an abstained outcome.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `true` keeps side-cache records on disk under [`dir`](Self::dir);
    /// `false` keeps them in memory for the life of the process.
    #[serde(default = "default_true")]
    pub offline: bool,
    /// Root directory of the on-disk cache.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            offline: true,
            dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".kcache")
}

/// The `[trusted]` section: the trusted-runtime allow-list.
///
/// Calls matching this table are assumed to be stable for the lifetime of a
/// cache directory and are not walked. Anything else must resolve to a
/// registered callable or the call graph abstains.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrustedRuntime {
    /// Exact call names (`range`, `len`).
    #[serde(default = "default_builtins")]
    pub builtins: Vec<String>,
    /// Name prefixes (`ti.`, `math.`).
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
    /// Method names accepted on any receiver (`norm`, `dot`).
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
}

impl Default for TrustedRuntime {
    fn default() -> Self {
        Self {
            builtins: default_builtins(),
            prefixes: default_prefixes(),
            methods: default_methods(),
        }
    }
}

impl TrustedRuntime {
    /// Returns `true` if `name` is listed as an exact builtin.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.iter().any(|b| b == name)
    }

    /// Returns `true` if `name` starts with a trusted prefix.
    pub fn has_trusted_prefix(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Returns `true` if `method` is a trusted method name.
    pub fn is_trusted_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_builtins() -> Vec<String> {
    strings(&[
        "range", "len", "min", "max", "abs", "int", "float", "bool", "print", "static",
        "grouped", "ndrange", "isinstance", "zip", "enumerate",
    ])
}

fn default_prefixes() -> Vec<String> {
    strings(&["ti.", "math."])
}

fn default_methods() -> Vec<String> {
    strings(&[
        "norm", "normalized", "dot", "cross", "sum", "transpose", "outer_product", "cast",
        "fill", "norm_sqr",
    ])
}

/// Target architecture of compiled kernels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// Host CPU (default).
    #[default]
    Cpu,
    /// NVIDIA CUDA.
    Cuda,
    /// Vulkan compute.
    Vulkan,
    /// Apple Metal.
    Metal,
}

/// The `[compile]` section: options consumed by the compiler backend.
///
/// Serialized field-by-field into the configuration fingerprint, so any
/// change here produces new cache keys. Fields whose names start with `_`
/// and [`session_tag`](Self::session_tag) are not fingerprinted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileConfig {
    /// Target architecture.
    #[serde(default)]
    pub arch: Arch,
    /// Optimization level, `0..=3`.
    #[serde(default = "default_opt_level")]
    pub opt_level: u8,
    /// Emit debug checks in generated code.
    #[serde(default)]
    pub debug: bool,
    /// Allow reassociating floating-point math.
    #[serde(default = "default_true")]
    pub fast_math: bool,
    /// Default floating-point type for untyped literals.
    #[serde(default = "default_fp")]
    pub default_fp: String,
    /// Default integer type for untyped literals.
    #[serde(default = "default_ip")]
    pub default_ip: String,
    /// Bounds-check array accesses.
    #[serde(default)]
    pub check_out_of_bound: bool,
    /// Backend-specific flags.
    ///
    /// Accepts either a single `"key=value"` string or a table.
    #[serde(default, deserialize_with = "deserialize_flags")]
    pub flags: BTreeMap<String, String>,
    /// Free-form label for the current session; never affects codegen.
    #[serde(default)]
    pub session_tag: Option<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            opt_level: default_opt_level(),
            debug: false,
            fast_math: true,
            default_fp: default_fp(),
            default_ip: default_ip(),
            check_out_of_bound: false,
            flags: BTreeMap::new(),
            session_tag: None,
        }
    }
}

fn default_opt_level() -> u8 {
    2
}

fn default_fp() -> String {
    "f32".to_string()
}

fn default_ip() -> String {
    "i32".to_string()
}

/// Deserializes backend flags from either `"k=v"` or a `{ k = "v" }` table.
fn deserialize_flags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Flags;

    impl<'de> Visitor<'de> for Flags {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a \"key=value\" string or a table of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let (key, value) = v
                .split_once('=')
                .ok_or_else(|| E::custom(format!("flag '{v}' is not key=value")))?;
            let mut map = BTreeMap::new();
            map.insert(key.trim().to_string(), value.trim().to_string());
            Ok(map)
        }

        fn visit_map<A: de::MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut map = BTreeMap::new();
            while let Some((key, value)) = access.next_entry::<String, String>()? {
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_any(Flags)
}
