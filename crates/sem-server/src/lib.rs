//! sem-server library crate.
//!
//! Everything the bridge and emulator binaries share above the pure
//! protocol layer in `sem-core`:
//!
//! ```text
//! driver shim (TCP, 127.0.0.1:9999)
//!         ↕
//! [sem-server]
//!   ├── framing/      async exact-length frame reads and writes
//!   ├── server/       accept loop + per-connection transaction loop
//!   ├── handler/      TransactionHandler trait (bridge or emulator)
//!   ├── session_log/  per-connection audit file
//!   ├── publisher/    broadcast state events + TCP event bus (:5556)
//!   ├── config/       TOML configuration
//!   ├── cli/          flags shared by both binaries
//!   └── runtime/      shutdown flag and service wiring
//! ```

pub mod cli;
pub mod config;
pub mod framing;
pub mod handler;
pub mod publisher;
pub mod runtime;
pub mod server;
pub mod session_log;

pub use cli::CommonArgs;
pub use config::{load_config, AppConfig, ConfigError};
pub use handler::TransactionHandler;
pub use publisher::{EventBus, StatePublisher};
pub use server::{ServerContext, ServerError, TransactionServer};
pub use session_log::{parse_log_line, LogRecord, SessionLogger};

use tracing_subscriber::EnvFilter;

/// Initialises process logging.  `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}
