//! Device passthrough: submits one command to the physical instrument.
//!
//! On Linux the production implementation is [`sg::SgDevice`], which drives
//! the kernel's generic SCSI driver with the `SG_IO` ioctl.  The call is
//! blocking and the channel is not safe for concurrent use, so callers go
//! through [`crate::channel::DeviceChannel`], which serialises access and
//! runs each call on Tokio's blocking pool.
//!
//! # Testability
//!
//! The [`Passthrough`] trait lets tests substitute [`mock::ScriptedDevice`]
//! for real hardware.

use std::path::PathBuf;
use std::time::Duration;

use sem_core::Direction;

pub mod mock;

#[cfg(target_os = "linux")]
pub mod sg;

/// Sense buffer size requested from the driver.
pub const SENSE_BUFFER_LEN: usize = 32;

/// One command to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughRequest {
    pub cdb: Vec<u8>,
    pub direction: Direction,
    /// Outbound data for [`Direction::HostToDevice`].
    pub outbound: Vec<u8>,
    /// Inbound buffer size for [`Direction::DeviceToHost`].
    pub inbound_len: usize,
    pub timeout: Duration,
}

/// What the device reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughReply {
    /// Inbound data actually transferred.
    pub data: Vec<u8>,
    pub device_status: u8,
    pub host_status: u16,
    pub driver_status: u16,
    pub sense: Vec<u8>,
}

impl PassthroughReply {
    /// `true` when device, host and driver all report success.
    pub fn is_good(&self) -> bool {
        self.device_status == 0 && self.host_status == 0 && self.driver_status == 0
    }

    /// Status breakdown for the session log.
    pub fn status_detail(&self) -> String {
        format!(
            "device status 0x{:02X}, host status 0x{:04X}, driver status 0x{:04X}",
            self.device_status, self.host_status, self.driver_status
        )
    }
}

/// Failure to submit a command at all.
#[derive(Debug, thiserror::Error)]
pub enum PassthroughError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SG_IO ioctl failed: {0}")]
    Ioctl(#[source] std::io::Error),

    #[error("CDB of {0} bytes exceeds the driver limit")]
    CdbTooLong(usize),

    #[error("transfer of {len} bytes exceeds the configured maximum of {max}")]
    TransferTooLarge { len: usize, max: usize },

    #[error("no SEM device found on /dev/sg0../dev/sg31")]
    NoDevice,

    #[error("generic SCSI passthrough is not available on this platform")]
    Unsupported,

    /// The blocking worker panicked or was cancelled.
    #[error("passthrough worker failed: {0}")]
    Worker(String),
}

/// A blocking command channel to the instrument.
#[cfg_attr(test, mockall::automock)]
pub trait Passthrough: Send {
    /// Submits one command and waits for completion.
    ///
    /// # Errors
    ///
    /// Only when the command could not be submitted.  A command the device
    /// rejected is an `Ok` reply with nonzero status.
    fn submit(&mut self, request: &PassthroughRequest) -> Result<PassthroughReply, PassthroughError>;
}

/// Opens the configured device, or discovers one when none is given.
///
/// # Errors
///
/// [`PassthroughError::NoDevice`] when discovery finds nothing,
/// [`PassthroughError::Open`] when the device cannot be opened, and
/// [`PassthroughError::Unsupported`] off Linux.
pub fn open_device(path: Option<PathBuf>) -> Result<Box<dyn Passthrough>, PassthroughError> {
    #[cfg(target_os = "linux")]
    {
        let path = match path {
            Some(path) => path,
            None => sg::discover().ok_or(PassthroughError::NoDevice)?,
        };
        Ok(Box::new(sg::SgDevice::open(&path)?))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        Err(PassthroughError::Unsupported)
    }
}
