//! The 40-byte little-endian status block returned by `C0 00`.
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0..24  | twelve `u16`: HT status, HT mode, ACCV, filament, vacuum status, vacuum mode, mag index, ALC sequence, LBG status, scan speed, scan status, hardware id |
//! | 24..36 | `i32` stage X, Y, Z |
//! | 36..40 | `i16` stage R, T |

use std::fmt::Write as _;

use super::state::DeviceState;

pub const STATUS_BLOCK_LEN: usize = 40;

pub fn encode(state: &DeviceState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATUS_BLOCK_LEN);
    for word in [
        state.ht_status,
        state.ht_mode,
        state.accv,
        state.filament,
        state.vacuum_status,
        state.vacuum_mode,
        state.mag_index,
        state.alc_seq,
        state.lbg_status,
        state.scan_speed,
        state.scan_status,
        state.hardware_id,
    ] {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    for pos in [state.stage_x, state.stage_y, state.stage_z] {
        buf.extend_from_slice(&pos.to_le_bytes());
    }
    buf.extend_from_slice(&state.stage_r.to_le_bytes());
    buf.extend_from_slice(&state.stage_t.to_le_bytes());
    buf
}

/// Parses a status block. Returns `None` when fewer than
/// [`STATUS_BLOCK_LEN`] bytes are available; trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Option<DeviceState> {
    if bytes.len() < STATUS_BLOCK_LEN {
        return None;
    }
    let u16_at = |off: usize| u16::from_le_bytes([bytes[off], bytes[off + 1]]);
    let i16_at = |off: usize| i16::from_le_bytes([bytes[off], bytes[off + 1]]);
    let i32_at = |off: usize| {
        i32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
    };

    Some(DeviceState {
        ht_status: u16_at(0),
        ht_mode: u16_at(2),
        accv: u16_at(4),
        filament: u16_at(6),
        vacuum_status: u16_at(8),
        vacuum_mode: u16_at(10),
        mag_index: u16_at(12),
        alc_seq: u16_at(14),
        lbg_status: u16_at(16),
        scan_speed: u16_at(18),
        scan_status: u16_at(20),
        hardware_id: u16_at(22),
        stage_x: i32_at(24),
        stage_y: i32_at(28),
        stage_z: i32_at(32),
        stage_r: i16_at(36),
        stage_t: i16_at(38),
    })
}

/// One differing byte between two status blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteChange {
    pub offset: usize,
    pub old: u8,
    pub new: u8,
}

/// Byte-wise comparison over the common prefix of `old` and `new`.
pub fn diff(old: &[u8], new: &[u8]) -> Vec<ByteChange> {
    old.iter()
        .zip(new)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(offset, (&old, &new))| ByteChange { offset, old, new })
        .collect()
}

/// Log detail for a status-block read: `diff: initial` with no previous
/// block, `diff: none` when identical, otherwise
/// `diff: [04]=98->E0 [05]=3A->2E`.
pub fn describe_diff(previous: Option<&[u8]>, current: &[u8]) -> String {
    let Some(previous) = previous else {
        return "diff: initial".to_string();
    };
    let changes = diff(previous, current);
    if changes.is_empty() {
        return "diff: none".to_string();
    }
    let mut out = String::from("diff:");
    for c in changes {
        let _ = write!(out, " [{:02X}]={:02X}->{:02X}", c.offset, c.old, c.new);
    }
    out
}
