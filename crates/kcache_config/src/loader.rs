//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KcacheConfig;
use std::path::Path;

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "kcache.toml";

const FP_TYPES: &[&str] = &["f16", "f32", "f64"];
const IP_TYPES: &[&str] = &["i8", "i16", "i32", "i64"];

/// Loads and validates a `kcache.toml` configuration from a project directory.
///
/// Reads `<project_dir>/kcache.toml`, parses it, and validates it.
pub fn load_config(project_dir: &Path) -> Result<KcacheConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Like [`load_config`], but a missing file yields the default configuration.
pub fn load_config_or_default(project_dir: &Path) -> Result<KcacheConfig, ConfigError> {
    match load_config(project_dir) {
        Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(KcacheConfig::default())
        }
        other => other,
    }
}

/// Parses and validates a `kcache.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KcacheConfig, ConfigError> {
    let config: KcacheConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and configuration values are consistent.
pub(crate) fn validate_config(config: &KcacheConfig) -> Result<(), ConfigError> {
    if config.cache.offline && config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("cache.dir".to_string()));
    }
    if config.trusted.prefixes.iter().any(String::is_empty) {
        return Err(ConfigError::ValidationError(
            "trusted.prefixes must not contain an empty prefix".to_string(),
        ));
    }
    if let Some(m) = config.trusted.methods.iter().find(|m| m.contains('.')) {
        return Err(ConfigError::ValidationError(format!(
            "trusted method '{m}' must be a bare name"
        )));
    }
    let compile = &config.compile;
    if compile.opt_level > 3 {
        return Err(ConfigError::ValidationError(format!(
            "compile.opt_level must be 0..=3, got {}",
            compile.opt_level
        )));
    }
    if !FP_TYPES.contains(&compile.default_fp.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "compile.default_fp '{}' is not one of {FP_TYPES:?}",
            compile.default_fp
        )));
    }
    if !IP_TYPES.contains(&compile.default_ip.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "compile.default_ip '{}' is not one of {IP_TYPES:?}",
            compile.default_ip
        )));
    }
    Ok(())
}
