//! TOML configuration shared by the bridge and emulator binaries.
//!
//! Every field has a default, so a missing file or a partial file is valid:
//!
//! ```toml
//! [server]
//! listen_addr = "127.0.0.1:9999"
//! response_layout = "canonical"
//!
//! [events]
//! bind_addr = "127.0.0.1:5556"
//!
//! [emulator]
//! evacuate_delay_ms = 5000
//!
//! [bridge]
//! timeout_ms = 10000
//!
//! [[bridge.intercept]]
//! opcode = 0xC5
//! sub_code = 0x01
//! response = "00 00 00 00"
//! label = "pressure gauge hangs the controller"
//! ```
//!
//! Command-line flags override file values; see [`crate::cli::CommonArgs`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sem_core::domain::state::{DEFAULT_ACCV, DEFAULT_HARDWARE_ID};
use sem_core::ResponseLayout;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// An intercept entry's canned response is not valid hex.
    #[error("intercept {label:?}: invalid hex response {value:?}")]
    InvalidInterceptResponse { label: String, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Transaction listener and session-log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Fixed per deployment; must match the driver shim build.
    #[serde(default)]
    pub response_layout: ResponseLayout,
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_session_log_dir")]
    pub session_log_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// State-event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_events_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Emulator timings and power-on state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmulatorConfig {
    #[serde(default = "default_evacuate_delay_ms")]
    pub evacuate_delay_ms: u64,
    #[serde(default = "default_vent_delay_ms")]
    pub vent_delay_ms: u64,
    #[serde(default = "default_alc_delay_ms")]
    pub alc_delay_ms: u64,
    #[serde(default = "default_ht_warmup_delay_ms")]
    pub ht_warmup_delay_ms: u64,
    #[serde(default = "default_hardware_id")]
    pub hardware_id: u16,
    #[serde(default = "default_accv")]
    pub accv: u16,
    /// Start with the chamber already evacuated.
    #[serde(default)]
    pub vacuum_ready: bool,
}

/// Hardware passthrough settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Generic SCSI device node; absent means auto-discover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default = "default_max_transfer")]
    pub max_transfer: u32,
    /// Canned responses for commands that must never reach the hardware.
    /// Empty by default.
    #[serde(default)]
    pub intercept: Vec<InterceptEntry>,
}

/// One `[[bridge.intercept]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterceptEntry {
    pub opcode: u8,
    /// Matches any sub-code when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_code: Option<u8>,
    /// Hex bytes, whitespace optional: `"0C 17 00 00"` or `"0C170000"`.
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub label: String,
}

impl InterceptEntry {
    /// Decodes [`InterceptEntry::response`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidInterceptResponse`] for non-hex text or an odd
    /// number of digits.
    pub fn response_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let digits: String = self.response.split_whitespace().collect();
        let invalid = || ConfigError::InvalidInterceptResponse {
            label: self.label.clone(),
            value: self.response.clone(),
        };
        if digits.len() % 2 != 0 {
            return Err(invalid());
        }
        (0..digits.len())
            .step_by(2)
            .map(|i| {
                digits
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(invalid)
            })
            .collect()
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9999))
}
fn default_rules_path() -> PathBuf {
    PathBuf::from("protocol_definitions.json")
}
fn default_session_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_events_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5556))
}
fn default_capacity() -> usize {
    crate::publisher::DEFAULT_CAPACITY
}
fn default_evacuate_delay_ms() -> u64 {
    5000
}
fn default_vent_delay_ms() -> u64 {
    3000
}
fn default_alc_delay_ms() -> u64 {
    4000
}
fn default_ht_warmup_delay_ms() -> u64 {
    2000
}
fn default_hardware_id() -> u16 {
    DEFAULT_HARDWARE_ID
}
fn default_accv() -> u16 {
    DEFAULT_ACCV
}
fn default_timeout_ms() -> u32 {
    10_000
}
fn default_max_transfer() -> u32 {
    65_536
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            response_layout: ResponseLayout::default(),
            rules_path: default_rules_path(),
            session_log_dir: default_session_log_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_addr: default_events_addr(),
            capacity: default_capacity(),
        }
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            evacuate_delay_ms: default_evacuate_delay_ms(),
            vent_delay_ms: default_vent_delay_ms(),
            alc_delay_ms: default_alc_delay_ms(),
            ht_warmup_delay_ms: default_ht_warmup_delay_ms(),
            hardware_id: default_hardware_id(),
            accv: default_accv(),
            vacuum_ready: false,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: None,
            timeout_ms: default_timeout_ms(),
            max_transfer: default_max_transfer(),
            intercept: Vec::new(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Loads `AppConfig` from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
