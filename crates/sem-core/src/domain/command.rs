//! Command layout table.
//!
//! Maps raw CDB bytes to a typed [`CommandKind`] carrying any parameter the
//! command encodes. The bridge uses it to sniff outbound "Set" commands and
//! inbound "Get" replies; the emulator dispatches on it directly.
//!
//! Parameter blocks follow the instrument's mode-1 layout: byte 0 opcode,
//! byte 1 sub-code, byte 4 parameter length, byte 5 class `0x40`, byte 6
//! function, value bytes from offset 9.

use super::event::{EventKind, StateChangeEvent};
use super::state::{AlcSequence, DeviceState, HtStatus, VacuumStatus};
use crate::decoder::TUNNEL_OPCODE;

/// INQUIRY opcode.
pub const INQUIRY_OPCODE: u8 = 0x12;
/// Allocation length assumed for unknown reads with no usable length field.
pub const DEFAULT_ALLOCATION_LEN: usize = 4;
/// Upper bound on the allocation length honoured for unknown reads.
pub const MAX_ALLOCATION_LEN: usize = 4096;
/// Standard INQUIRY reply length.
pub const INQUIRY_LEN: usize = 36;

/// Width of every single-field read reply.
const FIELD_REPLY_LEN: usize = 4;

/// Stage axes addressed by `C8 01..05`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageAxis {
    X,
    Y,
    Z,
    R,
    T,
}

/// Fields readable with a single-value "Get" command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadTarget {
    HardwareId,
    VacuumMode,
    VacuumStatus,
    HtStatus,
    Accv,
    Filament,
    LbgStatus,
    Mag,
    Stage(StageAxis),
}

impl ReadTarget {
    /// The event a reply to this read can update, if any.
    pub fn event_kind(self) -> Option<EventKind> {
        match self {
            Self::VacuumMode => Some(EventKind::VacuumMode),
            Self::VacuumStatus => Some(EventKind::Vacuum),
            Self::HtStatus => Some(EventKind::HtState),
            Self::Accv => Some(EventKind::Accv),
            Self::Filament => Some(EventKind::Filament),
            Self::LbgStatus => Some(EventKind::LbgStatus),
            Self::Mag => Some(EventKind::Mag),
            Self::HardwareId | Self::Stage(_) => None,
        }
    }

    /// Packs the field into a 4-byte little-endian reply.
    pub fn encode(self, state: &DeviceState) -> Vec<u8> {
        let mut out = vec![0u8; FIELD_REPLY_LEN];
        match self {
            Self::Stage(axis) => {
                let value = match axis {
                    StageAxis::X => state.stage_x,
                    StageAxis::Y => state.stage_y,
                    StageAxis::Z => state.stage_z,
                    StageAxis::R => i32::from(state.stage_r),
                    StageAxis::T => i32::from(state.stage_t),
                };
                out.copy_from_slice(&value.to_le_bytes());
            }
            Self::HardwareId => out[..2].copy_from_slice(&state.hardware_id.to_le_bytes()),
            other => {
                if let Some(kind) = other.event_kind() {
                    let value = state.get(kind) as u16;
                    out[..2].copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        out
    }

    /// Reads the `u16` value back out of a reply.
    pub fn parse_u16(reply: &[u8]) -> Option<u16> {
        match reply {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

/// Every command the device model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Empty,
    Inquiry,
    Read(ReadTarget),
    StatusBlock,
    ValvePosition,
    /// Known opcode with unknown meaning; answered with zeros.
    Placeholder(&'static str),
    SetVacuumMode(u16),
    Evacuate,
    Vent,
    AlcEvacuate,
    AlcVent,
    SetHt(bool),
    SetAccv(u16),
    SetFilament(u16),
    SetHtMode(u16),
    SetMag(u16),
    SetScanSpeed(u16),
    ScanControl(bool),
    RequestVideo,
    Tunnel,
    UnknownRead { allocation_len: usize },
    UnknownWrite,
}

impl CommandKind {
    /// The field value a "Set" command asks for.
    ///
    /// Vent has no immediate target since the chamber only reaches OFF once
    /// venting finishes.
    pub fn requested_change(&self) -> Option<StateChangeEvent> {
        let (kind, value) = match *self {
            Self::SetVacuumMode(v) => (EventKind::VacuumMode, v),
            Self::Evacuate => (EventKind::Vacuum, VacuumStatus::Evacuating.code()),
            Self::AlcEvacuate => (EventKind::AlcSeq, AlcSequence::Evacuating.code()),
            Self::AlcVent => (EventKind::AlcSeq, AlcSequence::Venting.code()),
            Self::SetHt(on) => {
                let target = if on { HtStatus::On } else { HtStatus::Off };
                (EventKind::HtState, target.code())
            }
            Self::SetAccv(v) => (EventKind::Accv, v),
            Self::SetFilament(v) => (EventKind::Filament, v),
            Self::SetHtMode(v) => (EventKind::HtMode, v),
            Self::SetMag(v) => (EventKind::Mag, v),
            Self::SetScanSpeed(v) => (EventKind::Speed, v),
            Self::ScanControl(start) => (EventKind::ScanStatus, u16::from(start)),
            _ => return None,
        };
        Some(StateChangeEvent::new(kind, i64::from(value)))
    }
}

struct CommandSpec {
    opcode: u8,
    sub_code: Option<u8>,
    selectors: &'static [(usize, u8)],
    min_len: usize,
    build: fn(&[u8]) -> CommandKind,
}

impl CommandSpec {
    fn matches(&self, cdb: &[u8]) -> bool {
        cdb.len() >= self.min_len
            && cdb[0] == self.opcode
            && self.sub_code.map_or(true, |sub| cdb.get(1) == Some(&sub))
            && self
                .selectors
                .iter()
                .all(|&(offset, byte)| cdb.get(offset) == Some(&byte))
    }
}

fn le_u16_at_9(cdb: &[u8]) -> u16 {
    u16::from_le_bytes([cdb[9], cdb[10]])
}

macro_rules! read {
    ($op:expr, $sub:expr, $target:expr) => {
        CommandSpec {
            opcode: $op,
            sub_code: Some($sub),
            selectors: &[],
            min_len: 2,
            build: |_| CommandKind::Read($target),
        }
    };
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        opcode: INQUIRY_OPCODE,
        sub_code: None,
        selectors: &[],
        min_len: 1,
        build: |_| CommandKind::Inquiry,
    },
    CommandSpec {
        opcode: TUNNEL_OPCODE,
        sub_code: None,
        selectors: &[],
        min_len: 1,
        build: |_| CommandKind::Tunnel,
    },
    read!(0xCC, 0x81, ReadTarget::HardwareId),
    read!(0xC4, 0x00, ReadTarget::VacuumMode),
    read!(0xC4, 0x01, ReadTarget::VacuumStatus),
    read!(0xC6, 0x10, ReadTarget::HtStatus),
    read!(0xC6, 0x11, ReadTarget::Accv),
    read!(0xC6, 0x12, ReadTarget::Filament),
    read!(0xC6, 0x13, ReadTarget::LbgStatus),
    read!(0xC3, 0x10, ReadTarget::Mag),
    read!(0xC8, 0x01, ReadTarget::Stage(StageAxis::X)),
    read!(0xC8, 0x02, ReadTarget::Stage(StageAxis::Y)),
    read!(0xC8, 0x03, ReadTarget::Stage(StageAxis::Z)),
    read!(0xC8, 0x04, ReadTarget::Stage(StageAxis::R)),
    read!(0xC8, 0x05, ReadTarget::Stage(StageAxis::T)),
    CommandSpec {
        opcode: 0xC0,
        sub_code: Some(0x00),
        selectors: &[],
        min_len: 2,
        build: |_| CommandKind::StatusBlock,
    },
    CommandSpec {
        opcode: 0xC5,
        sub_code: Some(0x09),
        selectors: &[],
        min_len: 2,
        build: |_| CommandKind::ValvePosition,
    },
    CommandSpec {
        opcode: 0xC5,
        sub_code: Some(0x01),
        selectors: &[],
        min_len: 2,
        build: |_| CommandKind::Placeholder("pressure gauge"),
    },
    CommandSpec {
        opcode: 0xC6,
        sub_code: Some(0x20),
        selectors: &[],
        min_len: 2,
        build: |_| CommandKind::Placeholder("gun auxiliary"),
    },
    CommandSpec {
        opcode: 0x01,
        sub_code: Some(0x01),
        selectors: &[(4, 0x06), (5, 0x40), (6, 0x44)],
        min_len: 10,
        build: |cdb| CommandKind::SetVacuumMode(u16::from(cdb[9])),
    },
    CommandSpec {
        opcode: 0x01,
        sub_code: Some(0x01),
        selectors: &[(4, 0x06), (5, 0x40), (6, 0x38)],
        min_len: 10,
        build: |cdb| match cdb[9] {
            0 => CommandKind::Vent,
            _ => CommandKind::Evacuate,
        },
    },
    CommandSpec {
        opcode: 0x01,
        sub_code: Some(0x01),
        selectors: &[(4, 0x06), (5, 0x40), (6, 0x3A)],
        min_len: 10,
        build: |cdb| match cdb[9] {
            0 => CommandKind::AlcVent,
            _ => CommandKind::AlcEvacuate,
        },
    },
    CommandSpec {
        opcode: 0x02,
        sub_code: Some(0x01),
        selectors: &[(4, 0x07)],
        min_len: 10,
        build: |cdb| CommandKind::SetHt(cdb[9] != 0),
    },
    CommandSpec {
        opcode: 0x02,
        sub_code: Some(0x01),
        selectors: &[(4, 0x08), (8, 0x00)],
        min_len: 11,
        build: |cdb| CommandKind::SetAccv(le_u16_at_9(cdb)),
    },
    CommandSpec {
        opcode: 0x02,
        sub_code: Some(0x01),
        selectors: &[(4, 0x08), (8, 0x14)],
        min_len: 11,
        build: |cdb| CommandKind::SetFilament(le_u16_at_9(cdb)),
    },
    CommandSpec {
        opcode: 0x02,
        sub_code: Some(0x01),
        selectors: &[(4, 0x08), (8, 0x20)],
        min_len: 11,
        build: |cdb| CommandKind::SetHtMode(le_u16_at_9(cdb)),
    },
    CommandSpec {
        opcode: 0x03,
        sub_code: Some(0x01),
        selectors: &[(8, 0x10)],
        min_len: 11,
        build: |cdb| CommandKind::SetMag(le_u16_at_9(cdb)),
    },
    CommandSpec {
        opcode: 0x00,
        sub_code: Some(0x01),
        selectors: &[(4, 0x00)],
        min_len: 8,
        build: |cdb| CommandKind::SetScanSpeed(u16::from_be_bytes([cdb[6], cdb[7]])),
    },
    CommandSpec {
        opcode: 0x00,
        sub_code: None,
        selectors: &[(4, 0x09)],
        min_len: 6,
        build: |cdb| CommandKind::ScanControl(cdb[5] != 0),
    },
    CommandSpec {
        opcode: 0x04,
        sub_code: None,
        selectors: &[(4, 0x1E), (5, 0x07)],
        min_len: 6,
        build: |_| CommandKind::RequestVideo,
    },
];

/// Classifies a CDB. Never panics; unmatched opcodes fall through to
/// [`CommandKind::UnknownRead`] for the `0xC0..=0xCF` read range and
/// [`CommandKind::UnknownWrite`] otherwise.
pub fn classify(cdb: &[u8]) -> CommandKind {
    let Some(&opcode) = cdb.first() else {
        return CommandKind::Empty;
    };

    if let Some(spec) = COMMANDS.iter().find(|spec| spec.matches(cdb)) {
        return (spec.build)(cdb);
    }

    if opcode & 0xF0 == 0xC0 {
        CommandKind::UnknownRead {
            allocation_len: allocation_len(cdb),
        }
    } else {
        CommandKind::UnknownWrite
    }
}

/// Big-endian allocation length at bytes 2..4, clamped to a sane default.
pub fn allocation_len(cdb: &[u8]) -> usize {
    match cdb.get(2..4) {
        Some(&[hi, lo]) => match usize::from(u16::from_be_bytes([hi, lo])) {
            0 => DEFAULT_ALLOCATION_LEN,
            n if n > MAX_ALLOCATION_LEN => DEFAULT_ALLOCATION_LEN,
            n => n,
        },
        _ => DEFAULT_ALLOCATION_LEN,
    }
}

/// Standard INQUIRY data identifying a processor-class JEOL SEM.
pub fn inquiry_data() -> Vec<u8> {
    let mut resp = vec![0u8; INQUIRY_LEN];
    resp[0] = 0x03;
    resp[4] = (INQUIRY_LEN - 5) as u8;
    resp[8..16].copy_from_slice(b"JEOL    ");
    resp[16..32].copy_from_slice(b"SEM             ");
    resp[32..36].copy_from_slice(b"1.0 ");
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_accv(value: u16) -> Vec<u8> {
        let [lo, hi] = value.to_le_bytes();
        vec![0x02, 0x01, 0x00, 0x00, 0x08, 0x40, 0x02, 0x01, 0x00, lo, hi, 0x00]
    }

    #[test]
    fn test_empty_cdb() {
        assert_eq!(classify(&[]), CommandKind::Empty);
    }

    #[test]
    fn test_set_accv_extracts_le_value() {
        assert_eq!(classify(&set_accv(12_000)), CommandKind::SetAccv(12_000));
    }

    #[test]
    fn test_evacuate_and_vent_share_function_byte() {
        let evac = [0x01, 0x01, 0x00, 0x00, 0x06, 0x40, 0x38, 0x00, 0x00, 0x01];
        let vent = [0x01, 0x01, 0x00, 0x00, 0x06, 0x40, 0x38, 0x00, 0x00, 0x00];
        assert_eq!(classify(&evac), CommandKind::Evacuate);
        assert_eq!(classify(&vent), CommandKind::Vent);
    }

    #[test]
    fn test_set_vacuum_mode() {
        let cdb = [0x01, 0x01, 0x00, 0x00, 0x06, 0x40, 0x44, 0x04, 0x00, 0x02];
        assert_eq!(classify(&cdb), CommandKind::SetVacuumMode(2));
    }

    #[test]
    fn test_set_ht_on_and_off() {
        let mut cdb = vec![0x02, 0x01, 0x00, 0x00, 0x07, 0x40, 0x02, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(classify(&cdb), CommandKind::SetHt(true));
        cdb[9] = 0;
        assert_eq!(classify(&cdb), CommandKind::SetHt(false));
    }

    #[test]
    fn test_short_cdb_falls_through_to_unknown() {
        let truncated = &set_accv(12_000)[..9];
        assert_eq!(classify(truncated), CommandKind::UnknownWrite);
    }

    #[test]
    fn test_scan_speed_is_big_endian() {
        let cdb = [0x00, 0x01, 0x00, 0x04, 0x00, 0x00, 0x01, 0x02];
        assert_eq!(classify(&cdb), CommandKind::SetScanSpeed(0x0102));
    }

    #[test]
    fn test_scan_control() {
        assert_eq!(
            classify(&[0x00, 0x00, 0x00, 0x00, 0x09, 0x01]),
            CommandKind::ScanControl(true)
        );
        assert_eq!(
            classify(&[0x00, 0x00, 0x00, 0x00, 0x09, 0x00]),
            CommandKind::ScanControl(false)
        );
    }

    #[test]
    fn test_reads_and_placeholders() {
        assert_eq!(classify(&[0xCC, 0x81, 0x00, 0x04]), CommandKind::Read(ReadTarget::HardwareId));
        assert_eq!(classify(&[0xC3, 0x10]), CommandKind::Read(ReadTarget::Mag));
        assert_eq!(
            classify(&[0xC8, 0x04]),
            CommandKind::Read(ReadTarget::Stage(StageAxis::R))
        );
        assert_eq!(classify(&[0xC0, 0x00, 0x00, 0x28]), CommandKind::StatusBlock);
        assert_eq!(classify(&[0xC5, 0x01]), CommandKind::Placeholder("pressure gauge"));
    }

    #[test]
    fn test_unknown_read_allocation_length() {
        assert_eq!(
            classify(&[0xC7, 0x00, 0x00, 0x10]),
            CommandKind::UnknownRead { allocation_len: 16 }
        );
        assert_eq!(
            classify(&[0xC7, 0x00, 0x00, 0x00]),
            CommandKind::UnknownRead { allocation_len: 4 }
        );
        assert_eq!(
            classify(&[0xC7, 0x00, 0xFF, 0xFF]),
            CommandKind::UnknownRead { allocation_len: 4 }
        );
        assert_eq!(classify(&[0xC7]), CommandKind::UnknownRead { allocation_len: 4 });
    }

    #[test]
    fn test_unknown_write_outside_read_range() {
        assert_eq!(classify(&[0x55, 0x01, 0x02]), CommandKind::UnknownWrite);
    }

    #[test]
    fn test_requested_change_for_set_commands() {
        assert_eq!(
            classify(&set_accv(12_000)).requested_change(),
            Some(StateChangeEvent::new(EventKind::Accv, 12_000))
        );
        assert_eq!(CommandKind::Vent.requested_change(), None);
        assert_eq!(CommandKind::Read(ReadTarget::Accv).requested_change(), None);
    }

    #[test]
    fn test_read_target_encode_and_parse() {
        let state = DeviceState::default();
        let reply = ReadTarget::Accv.encode(&state);
        assert_eq!(reply.len(), 4);
        assert_eq!(ReadTarget::parse_u16(&reply), Some(15_000));
        assert_eq!(ReadTarget::parse_u16(&[0x01]), None);
    }

    #[test]
    fn test_inquiry_identity_at_offset_eight() {
        let data = inquiry_data();
        assert_eq!(data.len(), 36);
        assert_eq!(&data[8..12], b"JEOL");
        assert_eq!(data[4], 31);
    }

    #[test]
    fn test_classify_never_panics_on_prefixes() {
        let long = set_accv(500);
        for len in 0..=long.len() {
            let _ = classify(&long[..len]);
        }
    }
}
