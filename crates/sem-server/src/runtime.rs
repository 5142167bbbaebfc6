//! Process wiring shared by both binaries: shutdown flag, transaction
//! server and optional event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use sem_core::{CommandDecoder, RuleTable};

use crate::config::AppConfig;
use crate::handler::TransactionHandler;
use crate::publisher::{EventBus, StatePublisher};
use crate::server::{ServerContext, ServerError, TransactionServer};

/// A shutdown flag cleared by Ctrl+C.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                flag.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C: {e}"),
        }
    });
    running
}

/// Binds the transaction server and, when enabled, the event bus, then
/// serves until `running` is cleared.
///
/// # Errors
///
/// [`ServerError::Bind`] if either listener cannot be bound.
pub async fn serve(
    config: &AppConfig,
    handler: Arc<dyn TransactionHandler>,
    publisher: StatePublisher,
    running: Arc<AtomicBool>,
) -> Result<(), ServerError> {
    let context = ServerContext {
        decoder: CommandDecoder::new(RuleTable::load_or_empty(&config.server.rules_path)),
        layout: config.server.response_layout,
        session_log_dir: config.server.session_log_dir.clone(),
    };
    let server = TransactionServer::bind(config.server.listen_addr, context, handler).await?;

    if config.events.enabled {
        let bus = EventBus::bind(config.events.bind_addr, publisher).await?;
        tokio::join!(server.run(Arc::clone(&running)), bus.run(running));
    } else {
        info!("event bus disabled");
        server.run(running).await;
    }
    Ok(())
}
