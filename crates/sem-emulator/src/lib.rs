//! sem-emulator library crate.
//!
//! A software model of the instrument for running the driver with no
//! hardware attached.  [`device::Emulator`] holds the state machines;
//! [`actor::spawn`] puts it behind a [`sem_server::TransactionHandler`].

pub mod actor;
pub mod device;

pub use actor::{spawn, EmulatorHandle};
pub use device::{Emulator, Timings};
