//! Command-line flags common to `sem-bridge` and `sem-emulator`.
//!
//! Each flag also reads a `SEM_*` environment variable.  Anything given on
//! the command line or in the environment overrides the configuration file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Args;

use sem_core::ResponseLayout;

use crate::config::AppConfig;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// TOML configuration file.  A missing file means built-in defaults.
    #[arg(long, default_value = "sem.toml", env = "SEM_CONFIG")]
    pub config: PathBuf,

    /// Address the driver shim connects to.
    #[arg(long, env = "SEM_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Address of the state-event bus.
    #[arg(long, env = "SEM_EVENTS")]
    pub events: Option<SocketAddr>,

    /// Disable the state-event bus.
    #[arg(long, env = "SEM_NO_EVENTS")]
    pub no_events: bool,

    /// JSON rule table used to name commands in the session log.
    #[arg(long, env = "SEM_RULES")]
    pub rules: Option<PathBuf>,

    /// Directory for per-connection session logs.
    #[arg(long, env = "SEM_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Use the short `status | data_len | data` response layout.
    #[arg(long, env = "SEM_LEGACY_FRAMES")]
    pub legacy_frames: bool,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[arg(long, env = "SEM_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl CommonArgs {
    /// Overlays the flags that were given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = self.listen {
            config.server.listen_addr = addr;
        }
        if let Some(addr) = self.events {
            config.events.bind_addr = addr;
        }
        if self.no_events {
            config.events.enabled = false;
        }
        if let Some(path) = &self.rules {
            config.server.rules_path = path.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.server.session_log_dir = dir.clone();
        }
        if self.legacy_frames {
            config.server.response_layout = ResponseLayout::Legacy;
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
    }
}
