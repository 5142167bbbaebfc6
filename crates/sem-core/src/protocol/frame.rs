//! Transaction frame types exchanged between the driver shim and a server.
//!
//! A *request* carries one command block (CDB) plus the data phase the driver
//! declared for it.  A *response* carries the overall status, the raw device
//! status, any sense bytes and the inbound data.
//!
//! # Wire layout
//!
//! ```text
//! Request:   [cdb_len:u32][direction:u8][xfer_len:u32][cdb:cdb_len][payload:xfer_len if direction=2]
//! Response:  [status:u8][device_status:u8][sense_len:u8][sense][data_len:u32][data]   (canonical)
//!            [status:u8][data_len:u32][data]                                          (legacy)
//! ```
//!
//! All integers are little-endian.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size in bytes of the fixed request header (`cdb_len` + `direction` + `xfer_len`).
pub const REQUEST_HEADER_SIZE: usize = 9;

/// Largest CDB the codec accepts.  Real command blocks are at most 16 bytes;
/// the bound only protects the reader from allocating attacker-sized buffers.
pub const MAX_CDB_LEN: usize = 64;

/// Largest data phase (in either direction) the codec accepts: 16 MiB.
pub const MAX_TRANSFER_LEN: usize = 16 * 1024 * 1024;

/// Overall status value for a successful transaction.
pub const STATUS_OK: u8 = 1;
/// Overall status value for a failed transaction.
pub const STATUS_FAIL: u8 = 0;

/// Direction of the data phase that accompanies a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// No data phase.
    None = 0,
    /// Data flows from the device to the host (a read).
    DeviceToHost = 1,
    /// Data flows from the host to the device (a write).
    HostToDevice = 2,
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::DeviceToHost),
            2 => Ok(Self::HostToDevice),
            other => Err(other),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::DeviceToHost => "in",
            Self::HostToDevice => "out",
        };
        f.write_str(s)
    }
}

/// One decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// The command block.  May be empty; the decoder reports that as `EmptyCDB`.
    pub cdb: Vec<u8>,
    /// Direction of the data phase.
    pub direction: Direction,
    /// Transfer length declared by the driver for the data phase.
    pub transfer_len: u32,
    /// Outbound payload.  Only non-empty when `direction` is `HostToDevice`.
    pub payload: Vec<u8>,
}

impl RequestFrame {
    /// Builds a request with no data phase.
    pub fn no_data(cdb: impl Into<Vec<u8>>) -> Self {
        Self {
            cdb: cdb.into(),
            direction: Direction::None,
            transfer_len: 0,
            payload: Vec::new(),
        }
    }

    /// Builds a read request that expects `transfer_len` bytes back.
    pub fn read(cdb: impl Into<Vec<u8>>, transfer_len: u32) -> Self {
        Self {
            cdb: cdb.into(),
            direction: Direction::DeviceToHost,
            transfer_len,
            payload: Vec::new(),
        }
    }

    /// Builds a write request carrying `payload` as its data phase.
    pub fn write(cdb: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        Self {
            cdb: cdb.into(),
            direction: Direction::HostToDevice,
            transfer_len: payload.len() as u32,
            payload,
        }
    }

    /// Returns the opcode (CDB byte 0), or `None` for an empty CDB.
    pub fn opcode(&self) -> Option<u8> {
        self.cdb.first().copied()
    }
}

/// One response frame, independent of the layout it is encoded with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFrame {
    /// Overall status: [`STATUS_OK`] or [`STATUS_FAIL`].
    pub status: u8,
    /// Raw SCSI status byte reported by the device (0 = GOOD).
    pub device_status: u8,
    /// Sense bytes returned alongside a failed command.
    pub sense: Vec<u8>,
    /// Inbound data, already fitted to the declared transfer length.
    pub data: Vec<u8>,
}

impl ResponseFrame {
    /// Returns `true` when the overall status reports success.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Which response frame layout a deployment speaks.
///
/// The two layouts cannot be told apart on the wire, so the layout is fixed
/// per deployment by configuration and never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLayout {
    /// `status | device_status | sense_len | sense | data_len | data`
    #[default]
    Canonical,
    /// `status | data_len | data`, used by the first shim builds.
    Legacy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_try_from_accepts_known_values() {
        assert_eq!(Direction::try_from(0), Ok(Direction::None));
        assert_eq!(Direction::try_from(1), Ok(Direction::DeviceToHost));
        assert_eq!(Direction::try_from(2), Ok(Direction::HostToDevice));
    }

    #[test]
    fn test_direction_try_from_rejects_unknown_value() {
        assert_eq!(Direction::try_from(3), Err(3));
    }

    #[test]
    fn test_write_request_declares_payload_length() {
        let req = RequestFrame::write(vec![0xFA], vec![1, 2, 3]);
        assert_eq!(req.transfer_len, 3);
        assert_eq!(req.direction, Direction::HostToDevice);
    }

    #[test]
    fn test_opcode_of_empty_cdb_is_none() {
        assert_eq!(RequestFrame::no_data(Vec::new()).opcode(), None);
    }

    #[test]
    fn test_response_layout_deserializes_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            layout: ResponseLayout,
        }
        let w: Wrapper = serde_json::from_str(r#"{"layout":"legacy"}"#).unwrap();
        assert_eq!(w.layout, ResponseLayout::Legacy);
    }
}
