//! Configuration validation

use crate::schema::RawConfig;
use std::net::SocketAddr;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Invalid bind address '{value}': {message}")]
    InvalidBindAddr { value: String, message: String },

    #[error("Heartbeat interval must be nonzero")]
    ZeroHeartbeatInterval,

    #[error("Heartbeat timeout {timeout}s must be greater than interval {interval}s")]
    TimeoutNotAboveInterval { interval: u64, timeout: u64 },

    #[error("Sandbox setting '{field}' cannot be empty")]
    EmptyCompilerPath { field: &'static str },

    #[error("Sandbox setting '{field}' must be nonzero")]
    ZeroSandboxTimeout { field: &'static str },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(addr) = &config.server.bind_addr {
        if let Err(e) = addr.parse::<SocketAddr>() {
            errors.push(ValidationError::InvalidBindAddr {
                value: addr.clone(),
                message: e.to_string(),
            });
        }
    }

    let interval = config.heartbeat.interval_secs.unwrap_or(5);
    let timeout = config.heartbeat.timeout_secs.unwrap_or(10);
    if interval == 0 {
        errors.push(ValidationError::ZeroHeartbeatInterval);
    } else if timeout <= interval {
        errors.push(ValidationError::TimeoutNotAboveInterval { interval, timeout });
    }

    if let Some(cc) = &config.sandbox.cc_path {
        if cc.is_empty() {
            errors.push(ValidationError::EmptyCompilerPath { field: "cc_path" });
        }
    }
    if let Some(cxx) = &config.sandbox.cxx_path {
        if cxx.is_empty() {
            errors.push(ValidationError::EmptyCompilerPath { field: "cxx_path" });
        }
    }
    if config.sandbox.compile_timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroSandboxTimeout {
            field: "compile_timeout_ms",
        });
    }
    if config.sandbox.execution_timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroSandboxTimeout {
            field: "execution_timeout_ms",
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawHeartbeatConfig, RawSandboxConfig, RawServerConfig};

    fn base_config() -> RawConfig {
        RawConfig {
            config_version: 1,
            server: RawServerConfig::default(),
            heartbeat: RawHeartbeatConfig::default(),
            sandbox: RawSandboxConfig::default(),
        }
    }

    #[test]
    fn defaults_validate_clean() {
        assert!(validate_config(&base_config()).is_empty());
    }

    #[test]
    fn bad_bind_addr_detected() {
        let mut config = base_config();
        config.server.bind_addr = Some("not-an-address".into());

        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidBindAddr { .. })));
    }

    #[test]
    fn timeout_must_exceed_interval() {
        let mut config = base_config();
        config.heartbeat.interval_secs = Some(10);
        config.heartbeat.timeout_secs = Some(8);

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::TimeoutNotAboveInterval {
                interval: 10,
                timeout: 8
            }
        )));
    }

    #[test]
    fn zero_sandbox_timeout_detected() {
        let mut config = base_config();
        config.sandbox.execution_timeout_ms = Some(0);

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::ZeroSandboxTimeout {
                field: "execution_timeout_ms"
            }
        )));
    }
}
