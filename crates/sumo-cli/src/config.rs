//! Configuration file – reads/writes `~/.sumo/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use sumo_runtime::{BridgeConfig, TeleopConfig};
use sumo_types::SumoError;

/// Persisted configuration stored in `~/.sumo/config.toml`.
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket port of the rosbridge-style gateway.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Joystick bindings and velocity scales.
    #[serde(default)]
    pub teleop: TeleopConfig,
}

fn default_gateway_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_port: default_gateway_port(),
            bridge: BridgeConfig::default(),
            teleop: TeleopConfig::default(),
        }
    }
}

/// Return the path to `~/.sumo/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sumo").join("config.toml")
}

/// Load the config from `path`, falling back to defaults when the file does
/// not exist.  Environment overrides are applied in both cases.
pub fn load_or_default(path: &Path) -> Result<Config, SumoError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SumoError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| SumoError::Io(format!("Failed to read config at {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| SumoError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `SUMO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SUMO_GATEWAY_PORT` | `gateway_port` |
/// | `SUMO_TICK_HZ` | `bridge.tick_hz` |
/// | `SUMO_SCALE_LINEAR` | `teleop.scale_linear` |
/// | `SUMO_SCALE_ANGULAR` | `teleop.scale_angular` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("SUMO_GATEWAY_PORT").and_then(|v| v.parse().ok()) {
        cfg.gateway_port = port;
    }
    if let Some(hz) = lookup("SUMO_TICK_HZ").and_then(|v| v.parse().ok()) {
        cfg.bridge.tick_hz = hz;
    }
    if let Some(scale) = lookup("SUMO_SCALE_LINEAR").and_then(|v| v.parse().ok()) {
        cfg.teleop.scale_linear = scale;
    }
    if let Some(scale) = lookup("SUMO_SCALE_ANGULAR").and_then(|v| v.parse().ok()) {
        cfg.teleop.scale_angular = scale;
    }
}

/// Save the config to a specific path, creating the parent directory.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), SumoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SumoError::Io(format!("Failed to create config directory: {e}")))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                SumoError::Io(format!("Failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| SumoError::Config(format!("Failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| {
        SumoError::Io(format!("Failed to write config at {}: {e}", path.display()))
    };
    // Owner read/write only (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
