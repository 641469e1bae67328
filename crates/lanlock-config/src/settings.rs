//! Validated settings structures

use crate::schema::{RawConfig, RawHeartbeatConfig, RawSandboxConfig, RawServerConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port for lanlockd
pub const DEFAULT_PORT: u16 = 2222;

/// Validated settings ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub heartbeat: HeartbeatSettings,
    pub sandbox: SandboxSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            server: ServerSettings::from_raw(raw.server),
            heartbeat: HeartbeatSettings::from_raw(raw.heartbeat),
            sandbox: SandboxSettings::from_raw(raw.sandbox),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::from_raw(RawServerConfig::default()),
            heartbeat: HeartbeatSettings::from_raw(RawHeartbeatConfig::default()),
            sandbox: SandboxSettings::from_raw(RawSandboxConfig::default()),
        }
    }
}

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
}

impl ServerSettings {
    fn from_raw(raw: RawServerConfig) -> Self {
        // Unparseable addresses were already rejected by validation
        let bind_addr = raw
            .bind_addr
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)));

        Self {
            bind_addr,
            data_dir: raw.data_dir.unwrap_or_else(lanlock_util::default_data_dir),
        }
    }
}

/// Heartbeat settings
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    /// Cadence at which clients report, and at which the stale sweep runs
    pub interval: Duration,

    /// Silence after which a client is presumed offline
    pub timeout: Duration,
}

impl HeartbeatSettings {
    fn from_raw(raw: RawHeartbeatConfig) -> Self {
        Self {
            interval: Duration::from_secs(raw.interval_secs.unwrap_or(5)),
            timeout: Duration::from_secs(raw.timeout_secs.unwrap_or(10)),
        }
    }
}

/// Sandbox settings
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub cc_path: String,
    pub cxx_path: String,
    pub compile_timeout: Duration,
    pub execution_timeout: Duration,
    /// Per-job workspaces go under here; `None` means the system temp dir
    pub temp_dir: Option<PathBuf>,
}

impl SandboxSettings {
    fn from_raw(raw: RawSandboxConfig) -> Self {
        Self {
            cc_path: raw.cc_path.unwrap_or_else(|| "gcc".to_string()),
            cxx_path: raw.cxx_path.unwrap_or_else(|| "g++".to_string()),
            compile_timeout: Duration::from_millis(raw.compile_timeout_ms.unwrap_or(2000)),
            execution_timeout: Duration::from_millis(raw.execution_timeout_ms.unwrap_or(2000)),
            temp_dir: raw.temp_dir,
        }
    }
}
