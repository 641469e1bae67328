//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Server settings
    #[serde(default)]
    pub server: RawServerConfig,

    /// Heartbeat cadence and liveness timeout
    #[serde(default)]
    pub heartbeat: RawHeartbeatConfig,

    /// Sandboxed code execution settings
    #[serde(default)]
    pub sandbox: RawSandboxConfig,
}

/// Server-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Listen address (default: 0.0.0.0:2222)
    pub bind_addr: Option<String>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

/// Heartbeat settings.
///
/// `timeout_secs` must be strictly greater than `interval_secs`, otherwise a
/// healthy client that reports on schedule would flap offline between beats.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawHeartbeatConfig {
    /// Seconds between expected client heartbeats (default: 5)
    pub interval_secs: Option<u64>,

    /// Seconds of silence before a client is marked offline (default: 10)
    pub timeout_secs: Option<u64>,
}

/// Sandbox settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSandboxConfig {
    /// C compiler binary (default: gcc)
    pub cc_path: Option<String>,

    /// C++ compiler binary (default: g++)
    pub cxx_path: Option<String>,

    /// Compile phase time limit in milliseconds (default: 2000)
    pub compile_timeout_ms: Option<u64>,

    /// Execution phase time limit in milliseconds (default: 2000)
    pub execution_timeout_ms: Option<u64>,

    /// Directory for per-job workspaces (default: the system temp dir)
    pub temp_dir: Option<PathBuf>,
}
