//! Result of executing one transaction against hardware or the emulator.

use std::fmt::Write as _;

use crate::protocol::frame::{ResponseFrame, STATUS_FAIL, STATUS_OK};

/// SCSI CHECK CONDITION device status.
pub const CHECK_CONDITION: u8 = 0x02;
/// Sense key ILLEGAL REQUEST.
pub const SENSE_KEY_ILLEGAL_REQUEST: u8 = 0x05;
/// Additional sense code: command sequence error.
pub const ASC_COMMAND_SEQUENCE_ERROR: u8 = 0x2C;
/// Fixed-format sense data length.
pub const FIXED_SENSE_LEN: usize = 18;
/// Payload bytes shown in log lines before eliding.
pub const PAYLOAD_SAMPLE_LEN: usize = 16;

/// Everything the handler learned while executing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub ok: bool,
    pub device_status: u8,
    pub host_status: u16,
    pub driver_status: u16,
    pub sense: Vec<u8>,
    pub data: Vec<u8>,
    /// Free-form suffix for the RES log line.
    pub detail: Option<String>,
}

impl TransactionOutcome {
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            ok: true,
            device_status: 0,
            host_status: 0,
            driver_status: 0,
            sense: Vec::new(),
            data,
            detail: None,
        }
    }

    pub fn ack() -> Self {
        Self::ok(Vec::new())
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Vec::new(),
            detail: Some(detail.into()),
            ..Self::ok(Vec::new())
        }
    }

    /// A rejected command whose precondition does not hold.
    pub fn interlock(detail: impl Into<String>) -> Self {
        Self {
            device_status: CHECK_CONDITION,
            sense: fixed_sense(SENSE_KEY_ILLEGAL_REQUEST, ASC_COMMAND_SEQUENCE_ERROR, 0),
            ..Self::failed(detail)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> u8 {
        if self.ok {
            STATUS_OK
        } else {
            STATUS_FAIL
        }
    }

    /// Builds the wire response. Successful payloads are fitted to the
    /// declared transfer length; failed transactions carry no payload.
    pub fn into_response(self, transfer_len: u32) -> ResponseFrame {
        let status = self.status();
        let data = if self.ok {
            fit_to_transfer_length(self.data, transfer_len)
        } else {
            Vec::new()
        };
        ResponseFrame {
            status,
            device_status: self.device_status,
            sense: self.sense,
            data,
        }
    }
}

/// Pads with zeros or truncates `data` to `declared` bytes; a zero
/// declaration leaves the natural length.
pub fn fit_to_transfer_length(mut data: Vec<u8>, declared: u32) -> Vec<u8> {
    if declared != 0 {
        data.resize(declared as usize, 0);
    }
    data
}

/// Fixed-format (response code 0x70) sense data.
pub fn fixed_sense(key: u8, asc: u8, ascq: u8) -> Vec<u8> {
    let mut sense = vec![0u8; FIXED_SENSE_LEN];
    sense[0] = 0x70;
    sense[2] = key & 0x0F;
    sense[7] = (FIXED_SENSE_LEN - 8) as u8;
    sense[12] = asc;
    sense[13] = ascq;
    sense
}

/// Space-separated upper-case hex, e.g. `02 01 00 08`.
pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Hex of the first [`PAYLOAD_SAMPLE_LEN`] bytes, with `...` if longer.
pub fn payload_sample(bytes: &[u8]) -> String {
    if bytes.len() > PAYLOAD_SAMPLE_LEN {
        format!("{}...", hex_bytes(&bytes[..PAYLOAD_SAMPLE_LEN]))
    } else {
        hex_bytes(bytes)
    }
}
