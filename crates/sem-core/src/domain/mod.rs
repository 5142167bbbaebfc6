//! Domain layer: the device model shared by the bridge and the emulator.
//!
//! Nothing here performs I/O.

pub mod command;
pub mod event;
pub mod state;
pub mod status_block;
pub mod transaction;

pub use command::{classify, CommandKind, ReadTarget, StageAxis};
pub use event::{EventKind, StateChangeEvent};
pub use state::{AlcSequence, DeviceState, HtStatus, VacuumStatus};
pub use transaction::{fit_to_transfer_length, hex_bytes, TransactionOutcome};
