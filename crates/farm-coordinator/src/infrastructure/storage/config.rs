//! TOML-based configuration for the coordinator.
//!
//! The file is read from `--config <path>` (or `FARM_CONFIG`) when given,
//! otherwise from the platform config directory:
//! - Linux:  `$XDG_CONFIG_HOME/farm-coordinator/config.toml`
//!   (`~/.config/farm-coordinator/config.toml`)
//! - macOS:  `~/Library/Application Support/farm-coordinator/config.toml`
//!
//! ```toml
//! [coordinator]
//! http_port = 8027
//! log_process = "bridge"
//!
//! [ports]
//! vnc_base = 5901
//! reserved = [9230]
//!
//! [vars]
//! server_ip = "10.0.0.5"
//!
//! [[workers]]
//! name = "mirror"
//! binary = "/opt/farm/bin/mirror"
//! args = ["--udid", "{uuid}", "--port", "{video_port}"]
//! scope = "interface"
//! geometry_sensitive = true
//! restart = "on_crash"
//!
//! [[devices]]
//! uuid = "00008030-001A2D0C3C02802E"
//! name = "lab-iphone-12"
//! ```
//!
//! Every field has a serde default, so a partial file (or none at all)
//! still yields a runnable configuration.
//!
//! In the default worker set it is the per-device `bridge` that takes the
//! stream and click geometry on its command line, so `bridge` is the
//! geometry-sensitive worker restarted on a frame change.  `mirror` is
//! launched without geometry and keeps running.  A deployment whose mirror
//! takes the frame size sets `geometry_sensitive = true` on it instead.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use farm_core::{fix_uuid, PortRanges};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::device_loop::LoopConfig;
use crate::application::supervision::RestartPolicy;
use crate::application::worker_catalog::{WorkerCatalog, WorkerScope, WorkerTemplate};
use crate::infrastructure::process::supervisor::SupervisorConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    /// Global `{placeholder}` values for worker templates.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerTemplate>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Event loop, HTTP and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// IP address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// How long a trigger handler waits for queue space before dropping.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Wait after SIGTERM before killing.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Wait after the kill before giving up.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Lines retained per process in the log tracker.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Process whose history `GET /log` shows.
    #[serde(default = "default_log_process")]
    pub log_process: String,
    /// Automatic restarts allowed per logical process.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

/// Per-purpose port range bases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortsConfig {
    #[serde(default = "default_vnc_base")]
    pub vnc_base: u16,
    #[serde(default = "default_video_base")]
    pub video_base: u16,
    #[serde(default = "default_wda_base")]
    pub wda_base: u16,
    #[serde(default = "default_bridge_base")]
    pub bridge_base: u16,
    #[serde(default = "default_max_devices")]
    pub max_devices: u16,
    /// Ports held by base processes; never handed to devices.
    #[serde(default = "default_reserved")]
    pub reserved: Vec<u16>,
}

/// Display name for a known device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    pub uuid: String,
    pub name: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8027
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_event_queue_capacity() -> usize {
    64
}
fn default_enqueue_timeout_ms() -> u64 {
    250
}
fn default_stop_timeout_ms() -> u64 {
    5000
}
fn default_kill_grace_ms() -> u64 {
    2000
}
fn default_log_capacity() -> usize {
    200
}
fn default_log_process() -> String {
    "bridge".to_string()
}
fn default_max_restarts() -> u32 {
    5
}
fn default_vnc_base() -> u16 {
    PortRanges::default().vnc_base
}
fn default_video_base() -> u16 {
    PortRanges::default().video_base
}
fn default_wda_base() -> u16 {
    PortRanges::default().wda_base
}
fn default_bridge_base() -> u16 {
    PortRanges::default().bridge_base
}
fn default_max_devices() -> u16 {
    PortRanges::default().max_devices
}
fn default_reserved() -> Vec<u16> {
    // Inspector port of the device provider.
    vec![9230]
}

/// Provider, control bridge and mirror, the stock worker set of a farm node.
fn default_workers() -> Vec<WorkerTemplate> {
    let mut provider = WorkerTemplate::new("provider", "/usr/local/bin/node", WorkerScope::Base);
    provider.args = [
        "--inspect=127.0.0.1:9230",
        "runmod.js",
        "provider",
        "--connect-sub",
        "tcp://{server_ip}:7250",
        "--connect-push",
        "tcp://{server_ip}:7270",
        "--public-ip",
        "{public_ip}",
    ]
    .map(String::from)
    .to_vec();
    provider.working_dir = Some(PathBuf::from("./repos/device-provider"));
    provider.drop_lines_containing = vec![" IOS Heartbeat:".to_string()];
    provider.restart = RestartPolicy::OnCrash;

    let mut bridge = WorkerTemplate::new("bridge", "./bin/device-bridge", WorkerScope::Connect);
    bridge.args = [
        "--udid",
        "{uuid}",
        "--name",
        "{name}",
        "--vnc-port",
        "{vnc_port}",
        "--wda-port",
        "{wda_port}",
        "--inspect-port",
        "{bridge_port}",
        "--stream-size",
        "{stream_width}x{stream_height}",
        "--click-size",
        "{click_width}x{click_height}",
        "--click-scale",
        "{click_scale}",
    ]
    .map(String::from)
    .to_vec();
    bridge.geometry_sensitive = true;
    bridge.watch_ownership = true;
    bridge.fields = BTreeMap::from([("vnc_port".to_string(), "{vnc_port}".to_string())]);

    let mut mirror = WorkerTemplate::new("mirror", "./bin/mirror", WorkerScope::Interface);
    mirror.args = [
        "--udid",
        "{uuid}",
        "--port",
        "{video_port}",
        "--coordinator",
        "http://127.0.0.1:{http_port}",
    ]
    .map(String::from)
    .to_vec();
    mirror.restart = RestartPolicy::OnCrash;
    mirror.fields = BTreeMap::from([("video_port".to_string(), "{video_port}".to_string())]);

    vec![provider, bridge, mirror]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            ports: PortsConfig::default(),
            vars: BTreeMap::new(),
            workers: default_workers(),
            devices: Vec::new(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            log_level: default_log_level(),
            event_queue_capacity: default_event_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            log_capacity: default_log_capacity(),
            log_process: default_log_process(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            vnc_base: default_vnc_base(),
            video_base: default_video_base(),
            wda_base: default_wda_base(),
            bridge_base: default_bridge_base(),
            max_devices: default_max_devices(),
            reserved: default_reserved(),
        }
    }
}

// ── Conversions into runtime settings ─────────────────────────────────────────

impl AppConfig {
    pub fn port_ranges(&self) -> PortRanges {
        PortRanges {
            vnc_base: self.ports.vnc_base,
            video_base: self.ports.video_base,
            wda_base: self.ports.wda_base,
            bridge_base: self.ports.bridge_base,
            max_devices: self.ports.max_devices,
        }
    }

    /// Configured reserved ports plus the coordinator's own HTTP port.
    pub fn reserved_ports(&self) -> Vec<u16> {
        let mut reserved = self.ports.reserved.clone();
        reserved.push(self.coordinator.http_port);
        reserved.sort_unstable();
        reserved.dedup();
        reserved
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            stop_timeout: Duration::from_millis(self.coordinator.stop_timeout_ms),
            kill_grace: Duration::from_millis(self.coordinator.kill_grace_ms),
        }
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.enqueue_timeout_ms)
    }

    /// Loop settings; device names are keyed by normalised uuid.
    pub fn loop_config(&self) -> LoopConfig {
        let device_names: HashMap<String, String> = self
            .devices
            .iter()
            .map(|d| (fix_uuid(&d.uuid), d.name.clone()))
            .collect();
        LoopConfig {
            max_restarts: self.coordinator.max_restarts,
            device_names,
        }
    }

    /// Worker catalog; `{http_port}` is always available to templates.
    pub fn worker_catalog(&self) -> WorkerCatalog {
        let mut vars = self.vars.clone();
        vars.entry("http_port".to_string())
            .or_insert_with(|| self.coordinator.http_port.to_string());
        WorkerCatalog::new(self.workers.clone(), vars)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the configuration.
///
/// An explicit `path` must exist.  Without one the platform file is used,
/// and a missing platform file yields [`AppConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    if let Some(path) = path {
        return read_config(path);
    }
    let path = config_file_path()?;
    match read_config(&path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok(AppConfig::default())
        }
        other => other,
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Writes `config` to `path`, creating parent directories.
///
/// Used to seed a config file an operator can then edit.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("farm-coordinator")
        })
    }

    #[cfg(not(target_os = "macos"))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("farm-coordinator"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
