//! Transaction server: accept loop and per-connection request/response loop.
//!
//! Each accepted connection runs in its own Tokio task and processes
//! transactions strictly in order:
//!
//! ```text
//! read frame → decode → log CMD → handler.execute → log RES → write frame
//! ```
//!
//! A framing error or a session-log failure ends that connection only; the
//! accept loop keeps running.  Shutdown is driven by a shared `AtomicBool`
//! cleared from the Ctrl+C handler in `main`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use sem_core::decoder::{CommandDecoder, Decoded, Phase};
use sem_core::ResponseLayout;

use crate::framing::{read_request, write_response, FrameError};
use crate::handler::TransactionHandler;
use crate::session_log::SessionLogger;

/// Fatal listener errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Accept(#[source] std::io::Error),
}

/// Why a connection ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("session log write failed: {0}")]
    SessionLog(#[from] std::io::Error),
}

/// Settings shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub decoder: CommandDecoder,
    pub layout: ResponseLayout,
    pub session_log_dir: PathBuf,
}

/// A bound transaction listener.
pub struct TransactionServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    handler: Arc<dyn TransactionHandler>,
}

impl TransactionServer {
    /// Binds the listener.  Failing to bind is a fatal startup error.
    pub async fn bind(
        addr: SocketAddr,
        context: ServerContext,
        handler: Arc<dyn TransactionHandler>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            context: Arc::new(context),
            handler,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Runs the accept loop until `running` is cleared.  Connections already
    /// accepted keep running until their peer disconnects.
    pub async fn run(self, running: Arc<AtomicBool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("transaction server listening on {addr}");
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Short timeout so the shutdown flag is polled while idle.
            match timeout(Duration::from_millis(200), self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    info!("client connected: {peer}");
                    let context = Arc::clone(&self.context);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, context, handler).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    handler: Arc<dyn TransactionHandler>,
) {
    match serve_connection(stream, peer, &context, handler.as_ref()).await {
        Ok(()) => info!("client {peer} disconnected"),
        Err(e) => warn!("client {peer} closed with error: {e}"),
    }
}

/// Runs one connection to completion, bracketing it with session meta lines.
///
/// # Errors
///
/// Returns the framing or session-log error that ended the connection.
pub async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &ServerContext,
    handler: &dyn TransactionHandler,
) -> Result<(), ConnectionError> {
    let mut log = SessionLogger::create(&context.session_log_dir, peer)?;
    debug!("session log for {peer}: {}", log.path().display());

    let result = transaction_loop(&mut stream, context, handler, &mut log).await;
    if let Err(e) = &result {
        log.error(&e.to_string())?;
    }
    log.finish()?;
    result
}

async fn transaction_loop(
    stream: &mut TcpStream,
    context: &ServerContext,
    handler: &dyn TransactionHandler,
    log: &mut SessionLogger,
) -> Result<(), ConnectionError> {
    while let Some(request) = read_request(stream).await? {
        let command = context
            .decoder
            .decode(&request.cdb, Some(&request.payload), Phase::Command);
        log.command(&command, &request)?;

        let outcome = handler.execute(&request).await;

        // Tunnel replies get their own label but keep the command's severity.
        let reply_name = Decoded {
            severity: command.severity,
            ..context
                .decoder
                .decode(&request.cdb, Some(&request.payload), Phase::Response)
        };
        let response = outcome.clone().into_response(request.transfer_len);
        log.response(&reply_name, &request, &outcome, &response.data)?;
        debug!(
            "{} -> status={} len={}",
            command.name,
            response.status,
            response.data.len()
        );

        write_response(stream, &response, context.layout).await?;
    }
    Ok(())
}
