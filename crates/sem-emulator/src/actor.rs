//! Runs an [`Emulator`] on its own task.
//!
//! Connections talk to the task through an [`EmulatorHandle`]; the task
//! interleaves their commands with timer expiries in one loop.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use sem_core::{DeviceState, RequestFrame, TransactionOutcome};
use sem_server::TransactionHandler;

use crate::device::Emulator;

const INBOX_CAPACITY: usize = 64;

enum Message {
    Execute {
        request: RequestFrame,
        reply: oneshot::Sender<TransactionOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<DeviceState>,
    },
}

/// Cloneable sender side of the emulator task.
#[derive(Clone)]
pub struct EmulatorHandle {
    tx: mpsc::Sender<Message>,
}

impl EmulatorHandle {
    /// Submits one transaction and waits for its outcome.
    pub async fn submit(&self, request: RequestFrame) -> TransactionOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Execute { request, reply }).await.is_err() {
            return TransactionOutcome::failed("emulator stopped");
        }
        rx.await
            .unwrap_or_else(|_| TransactionOutcome::failed("emulator stopped"))
    }

    /// Current device state, or `None` once the task has stopped.
    pub async fn snapshot(&self) -> Option<DeviceState> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Message::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }
}

#[async_trait]
impl TransactionHandler for EmulatorHandle {
    async fn execute(&self, request: &RequestFrame) -> TransactionOutcome {
        self.submit(request.clone()).await
    }
}

/// Moves `emulator` onto a new task.  The task ends when every handle has
/// been dropped.
pub fn spawn(emulator: Emulator) -> (EmulatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let task = tokio::spawn(run(emulator, rx));
    (EmulatorHandle { tx }, task)
}

async fn run(mut emulator: Emulator, mut rx: mpsc::Receiver<Message>) {
    loop {
        let deadline = emulator.next_deadline();
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let now = Instant::now();
                emulator.fire_due(now);
                match message {
                    Message::Execute { request, reply } => {
                        let _ = reply.send(emulator.execute(&request, now));
                    }
                    Message::Snapshot { reply } => {
                        let _ = reply.send(emulator.state().clone());
                    }
                }
            }
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                emulator.fire_due(Instant::now());
            }
        }
    }
    debug!("emulator task stopped");
}
