//! Binary codec for transaction request and response frames.
//!
//! Wire format (all integers little-endian):
//! ```text
//! Request:  [cdb_len:4][direction:1][xfer_len:4][cdb:cdb_len][payload:xfer_len, only if direction=2]
//! Response: [status:1][device_status:1][sense_len:1][sense:sense_len][data_len:4][data:data_len]
//! Legacy:   [status:1][data_len:4][data:data_len]
//! ```
//!
//! The functions here operate on complete byte slices.  The async socket
//! readers in `sem-server` read the header first with [`decode_request_header`]
//! and then exactly [`RequestHeader::body_len`] more bytes.

use thiserror::Error;

use crate::protocol::frame::{
    Direction, RequestFrame, ResponseFrame, ResponseLayout, MAX_CDB_LEN, MAX_TRANSFER_LEN,
    REQUEST_HEADER_SIZE,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it is supposed to contain.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The direction byte is not 0, 1 or 2.
    #[error("unknown data direction: {0}")]
    UnknownDirection(u8),

    /// The declared CDB length exceeds [`MAX_CDB_LEN`].
    #[error("CDB length {0} exceeds the {MAX_CDB_LEN}-byte limit")]
    CdbTooLong(usize),

    /// The declared transfer length exceeds [`MAX_TRANSFER_LEN`].
    #[error("transfer length {0} exceeds the {MAX_TRANSFER_LEN}-byte limit")]
    TransferTooLarge(usize),

    /// A command with no data phase declared a nonzero transfer length.
    #[error("direction none declares a transfer length of {0}")]
    TransferWithoutDirection(u32),
}

/// The fixed 9-byte request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub cdb_len: usize,
    pub direction: Direction,
    pub transfer_len: u32,
}

impl RequestHeader {
    /// Number of bytes that follow the header: the CDB plus, for writes, the
    /// outbound payload.
    pub fn body_len(&self) -> usize {
        match self.direction {
            Direction::HostToDevice => self.cdb_len + self.transfer_len as usize,
            Direction::None | Direction::DeviceToHost => self.cdb_len,
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Encodes a request frame.  Used by the driver side and by tests.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the frame violates the header contract
/// (oversized CDB or transfer, or a transfer length without a direction).
pub fn encode_request(req: &RequestFrame) -> Result<Vec<u8>, ProtocolError> {
    validate_header(req.cdb.len(), req.direction, req.transfer_len)?;

    let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + req.cdb.len() + req.payload.len());
    buf.extend_from_slice(&(req.cdb.len() as u32).to_le_bytes());
    buf.push(req.direction as u8);
    buf.extend_from_slice(&req.transfer_len.to_le_bytes());
    buf.extend_from_slice(&req.cdb);
    if req.direction == Direction::HostToDevice {
        // The payload always occupies exactly `transfer_len` bytes on the wire.
        let mut payload = req.payload.clone();
        payload.resize(req.transfer_len as usize, 0);
        buf.extend_from_slice(&payload);
    }
    Ok(buf)
}

/// Decodes and validates the fixed request header.
///
/// # Errors
///
/// Returns [`ProtocolError`] if fewer than 9 bytes are available or any
/// header field is out of contract.
pub fn decode_request_header(bytes: &[u8]) -> Result<RequestHeader, ProtocolError> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: REQUEST_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let cdb_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let direction =
        Direction::try_from(bytes[4]).map_err(ProtocolError::UnknownDirection)?;
    let transfer_len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

    validate_header(cdb_len, direction, transfer_len)?;

    Ok(RequestHeader {
        cdb_len,
        direction,
        transfer_len,
    })
}

/// Decodes one request frame from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or incomplete.
///
/// # Examples
///
/// ```rust
/// use sem_core::protocol::{decode_request, encode_request, RequestFrame};
///
/// let req = RequestFrame::read(vec![0xC6, 0x11, 0x00, 0x04], 4);
/// let bytes = encode_request(&req).unwrap();
/// let (decoded, n) = decode_request(&bytes).unwrap();
/// assert_eq!(decoded, req);
/// assert_eq!(n, bytes.len());
/// ```
pub fn decode_request(bytes: &[u8]) -> Result<(RequestFrame, usize), ProtocolError> {
    let header = decode_request_header(bytes)?;
    let body = &bytes[REQUEST_HEADER_SIZE..];
    if body.len() < header.body_len() {
        return Err(ProtocolError::InsufficientData {
            needed: REQUEST_HEADER_SIZE + header.body_len(),
            available: bytes.len(),
        });
    }
    let frame = request_from_parts(&header, &body[..header.body_len()]);
    Ok((frame, REQUEST_HEADER_SIZE + header.body_len()))
}

/// Assembles a [`RequestFrame`] from a validated header and its exact body.
///
/// `body` must be exactly [`RequestHeader::body_len`] bytes long.
pub fn request_from_parts(header: &RequestHeader, body: &[u8]) -> RequestFrame {
    let (cdb, payload) = body.split_at(header.cdb_len.min(body.len()));
    RequestFrame {
        cdb: cdb.to_vec(),
        direction: header.direction,
        transfer_len: header.transfer_len,
        payload: payload.to_vec(),
    }
}

fn validate_header(
    cdb_len: usize,
    direction: Direction,
    transfer_len: u32,
) -> Result<(), ProtocolError> {
    if cdb_len > MAX_CDB_LEN {
        return Err(ProtocolError::CdbTooLong(cdb_len));
    }
    if transfer_len as usize > MAX_TRANSFER_LEN {
        return Err(ProtocolError::TransferTooLarge(transfer_len as usize));
    }
    if direction == Direction::None && transfer_len != 0 {
        return Err(ProtocolError::TransferWithoutDirection(transfer_len));
    }
    Ok(())
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Encodes a response frame in the given layout.
///
/// The legacy layout has no room for the device status or sense bytes; they
/// are dropped.  Sense data longer than 255 bytes is truncated to fit the
/// one-byte length field.
pub fn encode_response(resp: &ResponseFrame, layout: ResponseLayout) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7 + resp.sense.len() + resp.data.len());
    buf.push(resp.status);
    if layout == ResponseLayout::Canonical {
        let sense = &resp.sense[..resp.sense.len().min(u8::MAX as usize)];
        buf.push(resp.device_status);
        buf.push(sense.len() as u8);
        buf.extend_from_slice(sense);
    }
    buf.extend_from_slice(&(resp.data.len() as u32).to_le_bytes());
    buf.extend_from_slice(&resp.data);
    buf
}

/// Decodes one response frame from the beginning of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if the frame is incomplete or
/// [`ProtocolError::TransferTooLarge`] if the data length is out of bounds.
pub fn decode_response(
    bytes: &[u8],
    layout: ResponseLayout,
) -> Result<(ResponseFrame, usize), ProtocolError> {
    let mut cursor = 0usize;
    let status = take(bytes, &mut cursor, 1)?[0];

    let (device_status, sense) = match layout {
        ResponseLayout::Canonical => {
            let fixed = take(bytes, &mut cursor, 2)?;
            let (device_status, sense_len) = (fixed[0], fixed[1] as usize);
            let sense = take(bytes, &mut cursor, sense_len)?.to_vec();
            (device_status, sense)
        }
        ResponseLayout::Legacy => (0, Vec::new()),
    };

    let len_bytes = take(bytes, &mut cursor, 4)?;
    let data_len =
        u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if data_len > MAX_TRANSFER_LEN {
        return Err(ProtocolError::TransferTooLarge(data_len));
    }
    let data = take(bytes, &mut cursor, data_len)?.to_vec();

    Ok((
        ResponseFrame {
            status,
            device_status,
            sense,
            data,
        },
        cursor,
    ))
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8], ProtocolError> {
    let end = *cursor + n;
    if bytes.len() < end {
        return Err(ProtocolError::InsufficientData {
            needed: end,
            available: bytes.len(),
        });
    }
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}
