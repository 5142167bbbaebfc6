//! Mutable device model.
//!
//! Fields hold the raw numeric values the hardware reports so the same type
//! can mirror a real microscope (which may report values outside the enums
//! below) and back the emulator.

use serde::{Deserialize, Serialize};

use super::event::{EventKind, StateChangeEvent};

/// Default vendor hardware identifier.
pub const DEFAULT_HARDWARE_ID: u16 = 0x170C;
/// Default accelerating voltage in volts.
pub const DEFAULT_ACCV: u16 = 15_000;

/// Chamber vacuum status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VacuumStatus {
    Off = 0,
    Evacuating = 2,
    Ready = 3,
}

/// High-tension status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HtStatus {
    Off = 0,
    Warmup = 2,
    On = 5,
}

/// Airlock chamber sequence codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AlcSequence {
    Idle = 0,
    Evacuating = 1,
    Ready = 2,
    Venting = 3,
}

macro_rules! impl_code {
    ($ty:ident { $($variant:ident),+ }) => {
        impl $ty {
            pub fn code(self) -> u16 {
                self as u16
            }
        }

        impl TryFrom<u16> for $ty {
            type Error = u16;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                $(
                    if value == $ty::$variant as u16 {
                        return Ok($ty::$variant);
                    }
                )+
                Err(value)
            }
        }
    };
}

impl_code!(VacuumStatus { Off, Evacuating, Ready });
impl_code!(HtStatus { Off, Warmup, On });
impl_code!(AlcSequence { Idle, Evacuating, Ready, Venting });

/// Snapshot of every tracked microscope value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub ht_status: u16,
    pub ht_mode: u16,
    pub accv: u16,
    pub filament: u16,
    pub vacuum_status: u16,
    pub vacuum_mode: u16,
    pub mag_index: u16,
    pub alc_seq: u16,
    pub lbg_status: u16,
    pub scan_speed: u16,
    pub scan_status: u16,
    pub hardware_id: u16,
    pub stage_x: i32,
    pub stage_y: i32,
    pub stage_z: i32,
    pub stage_r: i16,
    pub stage_t: i16,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            ht_status: HtStatus::Off.code(),
            ht_mode: 0,
            accv: DEFAULT_ACCV,
            filament: 0,
            vacuum_status: VacuumStatus::Off.code(),
            vacuum_mode: 0,
            mag_index: 100,
            alc_seq: AlcSequence::Idle.code(),
            lbg_status: 0,
            scan_speed: 1,
            scan_status: 0,
            hardware_id: DEFAULT_HARDWARE_ID,
            stage_x: 0,
            stage_y: 0,
            stage_z: 10_000,
            stage_r: 0,
            stage_t: 0,
        }
    }
}

impl DeviceState {
    pub fn vacuum(&self) -> Option<VacuumStatus> {
        VacuumStatus::try_from(self.vacuum_status).ok()
    }

    pub fn ht(&self) -> Option<HtStatus> {
        HtStatus::try_from(self.ht_status).ok()
    }

    pub fn alc(&self) -> Option<AlcSequence> {
        AlcSequence::try_from(self.alc_seq).ok()
    }

    pub fn vacuum_ready(&self) -> bool {
        self.vacuum() == Some(VacuumStatus::Ready)
    }

    /// Current value of the field an event kind tracks.
    pub fn get(&self, kind: EventKind) -> i64 {
        i64::from(*self.slot(kind))
    }

    /// Stores `value` and returns the event to publish if it differs from
    /// what was held before.
    pub fn set(&mut self, kind: EventKind, value: u16) -> Option<StateChangeEvent> {
        let slot = self.slot_mut(kind);
        if *slot == value {
            return None;
        }
        *slot = value;
        Some(StateChangeEvent::new(kind, i64::from(value)))
    }

    fn slot(&self, kind: EventKind) -> &u16 {
        match kind {
            EventKind::Accv => &self.accv,
            EventKind::Mag => &self.mag_index,
            EventKind::Speed => &self.scan_speed,
            EventKind::ScanStatus => &self.scan_status,
            EventKind::HtState => &self.ht_status,
            EventKind::HtMode => &self.ht_mode,
            EventKind::Filament => &self.filament,
            EventKind::Vacuum => &self.vacuum_status,
            EventKind::VacuumMode => &self.vacuum_mode,
            EventKind::AlcSeq => &self.alc_seq,
            EventKind::LbgStatus => &self.lbg_status,
        }
    }

    fn slot_mut(&mut self, kind: EventKind) -> &mut u16 {
        match kind {
            EventKind::Accv => &mut self.accv,
            EventKind::Mag => &mut self.mag_index,
            EventKind::Speed => &mut self.scan_speed,
            EventKind::ScanStatus => &mut self.scan_status,
            EventKind::HtState => &mut self.ht_status,
            EventKind::HtMode => &mut self.ht_mode,
            EventKind::Filament => &mut self.filament,
            EventKind::Vacuum => &mut self.vacuum_status,
            EventKind::VacuumMode => &mut self.vacuum_mode,
            EventKind::AlcSeq => &mut self.alc_seq,
            EventKind::LbgStatus => &mut self.lbg_status,
        }
    }
}
