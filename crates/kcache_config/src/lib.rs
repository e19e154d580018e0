//! Parsing and validation of `kcache.toml` configuration files.
//!
//! This crate reads the cache configuration file and produces a strongly-typed
//! [`KcacheConfig`]: cache toggles, the trusted-runtime table consulted while
//! walking call graphs, and the [`CompileConfig`] handed to the compiler backend
//! (and fingerprinted into every cache key).

#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod loader;
pub mod types;

pub use env::{apply_env_overrides, apply_process_env, ENV_DIR, ENV_ENABLED, ENV_OFFLINE};
pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_config_or_default, CONFIG_FILE_NAME};
pub use types::*;
