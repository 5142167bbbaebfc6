//! The seam between the transaction server and whatever executes commands.

use async_trait::async_trait;

use sem_core::{RequestFrame, TransactionOutcome};

/// Executes one decoded transaction.
///
/// Implemented by the hardware bridge (passthrough to the device) and by the
/// emulator (in-process state machine).  Failures are reported inside the
/// returned [`TransactionOutcome`], never as errors: the connection always
/// continues after a failed transaction.
#[async_trait]
pub trait TransactionHandler: Send + Sync + 'static {
    async fn execute(&self, request: &RequestFrame) -> TransactionOutcome;
}
