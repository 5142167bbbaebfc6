//! State-change events published to display subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The tracked device values that produce events.
///
/// Serialised as the upper-case tag the display process listens for, e.g.
/// `EventKind::HtState` → `"HT_STATE"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Accv,
    Mag,
    Speed,
    ScanStatus,
    HtState,
    HtMode,
    Filament,
    Vacuum,
    VacuumMode,
    AlcSeq,
    LbgStatus,
}

impl EventKind {
    /// Every event kind, in status-block order.
    pub const ALL: [EventKind; 11] = [
        EventKind::HtState,
        EventKind::HtMode,
        EventKind::Accv,
        EventKind::Filament,
        EventKind::Vacuum,
        EventKind::VacuumMode,
        EventKind::Mag,
        EventKind::AlcSeq,
        EventKind::LbgStatus,
        EventKind::Speed,
        EventKind::ScanStatus,
    ];

    /// The wire tag, identical to the serialised form.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Accv => "ACCV",
            Self::Mag => "MAG",
            Self::Speed => "SPEED",
            Self::ScanStatus => "SCAN_STATUS",
            Self::HtState => "HT_STATE",
            Self::HtMode => "HT_MODE",
            Self::Filament => "FILAMENT",
            Self::Vacuum => "VACUUM",
            Self::VacuumMode => "VACUUM_MODE",
            Self::AlcSeq => "ALC_SEQ",
            Self::LbgStatus => "LBG_STATUS",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One published state change: `{"event": "ACCV", "value": 12000}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub event: EventKind,
    pub value: Option<i64>,
}

impl StateChangeEvent {
    pub fn new(event: EventKind, value: i64) -> Self {
        Self {
            event,
            value: Some(value),
        }
    }
}

impl fmt::Display for StateChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "{}={v}", self.event),
            None => write!(f, "{}=null", self.event),
        }
    }
}
