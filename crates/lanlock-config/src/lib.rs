//! Configuration parsing and validation for lanlockd
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Server bind address and data directory
//! - Heartbeat cadence and liveness timeout
//! - Sandbox compiler paths and time limits
//! - Validation with clear error messages

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Settings> {
    let raw: RawConfig = toml::from_str(content)?;

    // Check version
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    // Validate
    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    // Convert to settings
    Ok(Settings::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(settings.server.bind_addr.port(), 2222);
        assert_eq!(settings.heartbeat.interval.as_secs(), 5);
        assert_eq!(settings.heartbeat.timeout.as_secs(), 10);
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [server]
            bind_addr = "192.168.1.10:4000"
            data_dir = "/var/lib/lanlockd"

            [heartbeat]
            interval_secs = 3
            timeout_secs = 9

            [sandbox]
            cc_path = "/usr/bin/clang"
            cxx_path = "/usr/bin/clang++"
            compile_timeout_ms = 5000
            execution_timeout_ms = 1000
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(settings.server.bind_addr.port(), 4000);
        assert_eq!(settings.heartbeat.interval.as_secs(), 3);
        assert_eq!(settings.sandbox.cc_path, "/usr/bin/clang");
        assert_eq!(settings.sandbox.compile_timeout.as_millis(), 5000);
        assert_eq!(settings.sandbox.execution_timeout.as_millis(), 1000);
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_timeout_not_above_interval() {
        let config = r#"
            config_version = 1

            [heartbeat]
            interval_secs = 10
            timeout_secs = 10
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }
}
