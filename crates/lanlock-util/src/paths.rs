//! Default paths for lanlockd components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/lanlock/config.toml` or `~/.config/lanlock/config.toml`
//! - Data: `$XDG_DATA_HOME/lanlock` or `~/.local/share/lanlock`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const LANLOCK_DATA_DIR_ENV: &str = "LANLOCK_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "lanlock";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/lanlock/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/lanlock/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$LANLOCK_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/lanlock` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/lanlock` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(LANLOCK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking LANLOCK_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_lanlock() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("lanlock"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_dir_contains_lanlock() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("lanlock"));
    }
}
