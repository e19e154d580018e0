//! Environment-variable overrides for the `[cache]` section.

use crate::error::ConfigError;
use crate::loader::validate_config;
use crate::types::KcacheConfig;
use std::path::PathBuf;

/// Overrides [`CacheSettings::enabled`](crate::CacheSettings::enabled).
pub const ENV_ENABLED: &str = "KCACHE_ENABLED";
/// Overrides [`CacheSettings::offline`](crate::CacheSettings::offline).
pub const ENV_OFFLINE: &str = "KCACHE_OFFLINE";
/// Overrides [`CacheSettings::dir`](crate::CacheSettings::dir).
pub const ENV_DIR: &str = "KCACHE_DIR";

/// Applies overrides read through `lookup`, then re-validates.
///
/// `lookup` returns the value of a variable or `None` if it is unset; tests
/// pass a closure over a map instead of touching the process environment.
pub fn apply_env_overrides<F>(config: &mut KcacheConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_ENABLED) {
        config.cache.enabled = parse_bool(ENV_ENABLED, &value)?;
    }
    if let Some(value) = lookup(ENV_OFFLINE) {
        config.cache.offline = parse_bool(ENV_OFFLINE, &value)?;
    }
    if let Some(value) = lookup(ENV_DIR) {
        config.cache.dir = PathBuf::from(value);
    }
    validate_config(config)
}

/// Applies overrides from the process environment.
pub fn apply_process_env(config: &mut KcacheConfig) -> Result<(), ConfigError> {
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
