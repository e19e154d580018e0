//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `kcache.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// An environment override carried a value that could not be parsed.
    #[error("invalid value '{value}' for environment variable {name}")]
    InvalidEnv {
        /// The variable name.
        name: String,
        /// The offending value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_field() {
        let err = ConfigError::MissingField("cache.dir".to_string());
        assert_eq!(format!("{err}"), "missing required field: cache.dir");
    }

    #[test]
    fn display_parse_error() {
        let err = ConfigError::ParseError("expected '=' at line 3".to_string());
        assert_eq!(
            format!("{err}"),
            "failed to parse configuration: expected '=' at line 3"
        );
    }

    #[test]
    fn display_validation_error() {
        let err = ConfigError::ValidationError("opt_level must be 0..=3".to_string());
        assert_eq!(format!("{err}"), "validation error: opt_level must be 0..=3");
    }

    #[test]
    fn display_invalid_env() {
        let err = ConfigError::InvalidEnv {
            name: "KCACHE_ENABLED".to_string(),
            value: "maybe".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "invalid value 'maybe' for environment variable KCACHE_ENABLED"
        );
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::IoError(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
