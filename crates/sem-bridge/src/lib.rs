//! sem-bridge library crate.
//!
//! Relays driver transactions to the physical instrument through the
//! generic SCSI passthrough, observing state changes as they go by.
//!
//! ```text
//! driver shim ──TCP──▶ sem-server ──▶ BridgeService
//!                                       ├── intercept/   canned replies, never sent
//!                                       ├── mirror/      last-known values, dedup
//!                                       └── channel/     one command at a time
//!                                              └── passthrough/  SG_IO ioctl
//! ```

pub mod channel;
pub mod intercept;
pub mod mirror;
pub mod passthrough;
pub mod service;

pub use channel::DeviceChannel;
pub use intercept::InterceptionPolicy;
pub use mirror::StateMirror;
pub use passthrough::{open_device, Passthrough, PassthroughError};
pub use service::BridgeService;
