//! # sem-core
//!
//! Shared library for the SEM protocol bridge and emulator.  It contains the
//! command decoder, the wire transport codec and the device model.
//!
//! The crate has no dependencies on sockets, files opened per request, or an
//! async runtime, so everything in it can be unit tested in isolation.
//!
//! # Architecture overview
//!
//! The instrument control software talks to the microscope with SCSI-style
//! command blocks (CDBs).  A driver shim forwards each command over TCP to
//! either a bridge (real hardware) or an emulator (software model).  This
//! crate defines what both sides share:
//!
//! - **`decoder`** – Classifies raw CDB bytes against a declarative rule
//!   table loaded at startup, including commands tunnelled inside opcode
//!   `0xFA`.
//!
//! - **`protocol`** – How transactions travel over the wire: a 9-byte request
//!   header followed by the CDB and optional outbound payload, answered by a
//!   response frame in one of two fixed layouts.
//!
//! - **`domain`** – The command layout table, the device state record, the
//!   packed status block, state-change events and transaction outcomes.

pub mod decoder;
pub mod domain;
pub mod protocol;

pub use decoder::{CommandDecoder, Decoded, DecodeKind, Phase, RuleTable, Severity};
pub use domain::command::{classify, CommandKind, ReadTarget};
pub use domain::event::{EventKind, StateChangeEvent};
pub use domain::state::{AlcSequence, DeviceState, HtStatus, VacuumStatus};
pub use domain::transaction::{fit_to_transfer_length, TransactionOutcome};
pub use protocol::codec::{decode_request, encode_request, ProtocolError};
pub use protocol::frame::{Direction, RequestFrame, ResponseFrame, ResponseLayout};
