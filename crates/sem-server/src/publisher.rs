//! State-change fan-out.
//!
//! [`StatePublisher`] is a cheap-to-clone handle over a
//! `tokio::sync::broadcast` channel.  Publishing never blocks and never fails
//! the caller: with no subscribers the event is simply dropped.
//!
//! [`EventBus`] exposes the channel to external display processes as a TCP
//! listener that streams one JSON object per line to every subscriber:
//!
//! ```text
//! {"event":"ACCV","value":12000}
//! {"event":"HT_STATE","value":2}
//! ```
//!
//! A subscriber that falls behind skips the events it missed.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use sem_core::StateChangeEvent;

use crate::server::ServerError;

/// Default broadcast buffer, in events.
pub const DEFAULT_CAPACITY: usize = 256;

/// Publish handle shared by every connection handler.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    tx: broadcast::Sender<StateChangeEvent>,
}

impl StatePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish.
    pub fn publish(&self, event: StateChangeEvent) {
        debug!("publish {event}");
        // An error only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = StateChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// TCP listener streaming published events to subscribers.
pub struct EventBus {
    listener: TcpListener,
    publisher: StatePublisher,
}

impl EventBus {
    /// Binds the event bus listener.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, publisher: StatePublisher) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            publisher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Accepts subscribers until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("event bus listening on {addr}");
        }

        while running.load(Ordering::Relaxed) {
            match timeout(Duration::from_millis(200), self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    info!("event subscriber connected: {peer}");
                    let rx = self.publisher.subscribe();
                    tokio::spawn(async move {
                        stream_events(stream, rx).await;
                        info!("event subscriber disconnected: {peer}");
                    });
                }
                Ok(Err(e)) => error!("event bus accept error: {e}"),
                Err(_) => {}
            }
        }
        info!("event bus stopped");
    }
}

async fn stream_events(mut stream: TcpStream, mut rx: broadcast::Receiver<StateChangeEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("event subscriber lagged; skipped {skipped} events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("event serialization failed: {e}");
                continue;
            }
        };
        line.push(b'\n');

        if stream.write_all(&line).await.is_err() {
            break;
        }
    }
}
