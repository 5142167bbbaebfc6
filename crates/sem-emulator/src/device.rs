//! The emulated instrument: one [`DeviceState`] plus pending timed
//! transitions.
//!
//! Every write goes through [`Emulator`], which the actor in
//! [`crate::actor`] owns exclusively, so foreground commands and timer
//! expiries never race.  A delayed transition is guarded twice: by the value
//! it expects to replace, and by the field's epoch, which any later write to
//! the same field bumps.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use sem_core::domain::command::{allocation_len, classify, inquiry_data, CommandKind};
use sem_core::domain::status_block;
use sem_core::{
    AlcSequence, DeviceState, EventKind, HtStatus, RequestFrame, TransactionOutcome, VacuumStatus,
};
use sem_server::config::EmulatorConfig;
use sem_server::StatePublisher;

/// Reply to the valve-position read; its real meaning is unknown.
const VALVE_POSITION_REPLY: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Delays of the modelled state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub evacuate: Duration,
    pub vent: Duration,
    pub alc: Duration,
    pub ht_warmup: Duration,
}

impl From<&EmulatorConfig> for Timings {
    fn from(config: &EmulatorConfig) -> Self {
        Self {
            evacuate: Duration::from_millis(config.evacuate_delay_ms),
            vent: Duration::from_millis(config.vent_delay_ms),
            alc: Duration::from_millis(config.alc_delay_ms),
            ht_warmup: Duration::from_millis(config.ht_warmup_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    due: Instant,
    seq: u64,
    kind: EventKind,
    from: u16,
    to: u16,
    epoch: u64,
}

impl Ord for Transition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

impl PartialOrd for Transition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Emulator {
    state: DeviceState,
    timings: Timings,
    publisher: StatePublisher,
    pending: BinaryHeap<Reverse<Transition>>,
    epochs: HashMap<EventKind, u64>,
    next_seq: u64,
}

impl Emulator {
    pub fn new(config: &EmulatorConfig, publisher: StatePublisher) -> Self {
        let mut state = DeviceState {
            hardware_id: config.hardware_id,
            accv: config.accv,
            ..DeviceState::default()
        };
        if config.vacuum_ready {
            state.vacuum_status = VacuumStatus::Ready.code();
        }
        Self {
            state,
            timings: Timings::from(config),
            publisher,
            pending: BinaryHeap::new(),
            epochs: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Deadline of the earliest pending transition.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.peek().map(|Reverse(t)| t.due)
    }

    /// Applies every transition due at or before `now`, in deadline order.
    pub fn fire_due(&mut self, now: Instant) {
        while let Some(&Reverse(t)) = self.pending.peek() {
            if t.due > now {
                break;
            }
            self.pending.pop();
            let epoch = self.epochs.get(&t.kind).copied().unwrap_or(0);
            if epoch != t.epoch || self.state.get(t.kind) != i64::from(t.from) {
                debug!(field = %t.kind, "dropping superseded transition");
                continue;
            }
            self.store(t.kind, t.to);
        }
    }

    /// Executes one transaction at time `now`.
    pub fn execute(&mut self, request: &RequestFrame, now: Instant) -> TransactionOutcome {
        match classify(&request.cdb) {
            CommandKind::Tunnel => self.tunnel(&request.payload, now),
            kind => self.dispatch(kind, &request.cdb, now),
        }
    }

    /// Runs the command carried in a tunnel payload exactly as if it had
    /// arrived unwrapped.  Only one level is unwrapped.
    fn tunnel(&mut self, inner: &[u8], now: Instant) -> TransactionOutcome {
        match classify(inner) {
            CommandKind::Empty => TransactionOutcome::ack(),
            CommandKind::Tunnel => TransactionOutcome::ack().with_detail("nested tunnel ignored"),
            kind => self.dispatch(kind, inner, now),
        }
    }

    fn dispatch(&mut self, kind: CommandKind, cdb: &[u8], now: Instant) -> TransactionOutcome {
        match kind {
            CommandKind::Inquiry => TransactionOutcome::ok(inquiry_data()),
            CommandKind::Read(target) => TransactionOutcome::ok(target.encode(&self.state)),
            CommandKind::StatusBlock => TransactionOutcome::ok(status_block::encode(&self.state)),
            CommandKind::ValvePosition => TransactionOutcome::ok(VALVE_POSITION_REPLY.to_vec()),
            CommandKind::Placeholder(_) => TransactionOutcome::ok(vec![0; allocation_len(cdb)]),
            CommandKind::UnknownRead { allocation_len } => {
                TransactionOutcome::ok(vec![0; allocation_len])
            }

            CommandKind::Evacuate => {
                self.force_ht_off("evacuating");
                self.write(EventKind::Vacuum, VacuumStatus::Evacuating.code());
                self.schedule(
                    EventKind::Vacuum,
                    VacuumStatus::Evacuating.code(),
                    VacuumStatus::Ready.code(),
                    self.timings.evacuate,
                    now,
                );
                TransactionOutcome::ack()
            }
            CommandKind::Vent => self.vent(now),
            CommandKind::AlcEvacuate => {
                self.alc_step(AlcSequence::Evacuating, AlcSequence::Ready, now)
            }
            CommandKind::AlcVent => self.alc_step(AlcSequence::Venting, AlcSequence::Idle, now),
            CommandKind::SetHt(true) => self.ht_on(now),
            CommandKind::SetHt(false) => {
                self.write(EventKind::HtState, HtStatus::Off.code());
                TransactionOutcome::ack()
            }

            CommandKind::SetVacuumMode(v) => self.set(EventKind::VacuumMode, v),
            CommandKind::SetAccv(v) => self.set(EventKind::Accv, v),
            CommandKind::SetFilament(v) => self.set(EventKind::Filament, v),
            CommandKind::SetHtMode(v) => self.set(EventKind::HtMode, v),
            CommandKind::SetMag(v) => self.set(EventKind::Mag, v),
            CommandKind::SetScanSpeed(v) => self.set(EventKind::Speed, v),
            CommandKind::ScanControl(start) => self.set(EventKind::ScanStatus, u16::from(start)),

            CommandKind::Empty
            | CommandKind::RequestVideo
            | CommandKind::Tunnel
            | CommandKind::UnknownWrite => TransactionOutcome::ack(),
        }
    }

    fn vent(&mut self, now: Instant) -> TransactionOutcome {
        self.force_ht_off("venting");
        let current = self.state.vacuum_status;
        if current == VacuumStatus::Off.code() {
            self.cancel(EventKind::Vacuum);
        } else {
            self.schedule(
                EventKind::Vacuum,
                current,
                VacuumStatus::Off.code(),
                self.timings.vent,
                now,
            );
        }
        TransactionOutcome::ack()
    }

    /// HT cannot stay on while the chamber is not at vacuum.
    fn force_ht_off(&mut self, reason: &str) {
        if self.state.ht() != Some(HtStatus::Off) {
            info!("{reason} with HT {}; forcing HT off", self.state.ht_status);
            self.write(EventKind::HtState, HtStatus::Off.code());
        }
    }

    fn alc_step(&mut self, start: AlcSequence, end: AlcSequence, now: Instant) -> TransactionOutcome {
        self.write(EventKind::AlcSeq, start.code());
        self.schedule(EventKind::AlcSeq, start.code(), end.code(), self.timings.alc, now);
        TransactionOutcome::ack()
    }

    fn ht_on(&mut self, now: Instant) -> TransactionOutcome {
        if !self.state.vacuum_ready() {
            info!(vacuum = self.state.vacuum_status, "HT on refused: vacuum not ready");
            return TransactionOutcome::interlock(format!(
                "HT interlock: vacuum status {} is not READY",
                self.state.vacuum_status
            ));
        }
        if matches!(self.state.ht(), Some(HtStatus::Warmup | HtStatus::On)) {
            return TransactionOutcome::ack();
        }
        self.write(EventKind::HtState, HtStatus::Warmup.code());
        self.schedule(
            EventKind::HtState,
            HtStatus::Warmup.code(),
            HtStatus::On.code(),
            self.timings.ht_warmup,
            now,
        );
        TransactionOutcome::ack()
    }

    fn set(&mut self, kind: EventKind, value: u16) -> TransactionOutcome {
        self.write(kind, value);
        TransactionOutcome::ack()
    }

    /// Foreground write: supersedes any pending transition on the field.
    fn write(&mut self, kind: EventKind, value: u16) {
        self.cancel(kind);
        self.store(kind, value);
    }

    fn store(&mut self, kind: EventKind, value: u16) {
        if let Some(event) = self.state.set(kind, value) {
            debug!(%event, "state change");
            self.publisher.publish(event);
        }
    }

    fn cancel(&mut self, kind: EventKind) -> u64 {
        let epoch = self.epochs.entry(kind).or_insert(0);
        *epoch += 1;
        *epoch
    }

    fn schedule(&mut self, kind: EventKind, from: u16, to: u16, delay: Duration, now: Instant) {
        let epoch = self.cancel(kind);
        self.next_seq += 1;
        self.pending.push(Reverse(Transition {
            due: now + delay,
            seq: self.next_seq,
            kind,
            from,
            to,
            epoch,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sem_core::domain::command::INQUIRY_LEN;
    use sem_core::domain::transaction::CHECK_CONDITION;
    use sem_core::StateChangeEvent;
    use tokio::sync::broadcast;

    const EVACUATE: [u8; 10] = [0x01, 0x01, 0x00, 0x00, 0x06, 0x40, 0x38, 0x00, 0x00, 0x01];
    const VENT: [u8; 10] = [0x01, 0x01, 0x00, 0x00, 0x06, 0x40, 0x38, 0x00, 0x00, 0x00];
    const HT_ON: [u8; 10] = [0x02, 0x01, 0x00, 0x00, 0x07, 0x40, 0x02, 0x00, 0x00, 0x01];

    fn emulator(config: EmulatorConfig) -> (Emulator, broadcast::Receiver<StateChangeEvent>) {
        let publisher = StatePublisher::new(32);
        let rx = publisher.subscribe();
        (Emulator::new(&config, publisher), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<StateChangeEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.to_string());
        }
        out
    }

    fn run(emu: &mut Emulator, cdb: &[u8], now: Instant) -> TransactionOutcome {
        emu.execute(&RequestFrame::no_data(cdb.to_vec()), now)
    }

    #[test]
    fn test_evacuate_then_ready_after_delay() {
        // Arrange
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());
        let t0 = Instant::now();

        // Act
        assert!(run(&mut emu, &EVACUATE, t0).ok);
        emu.fire_due(t0 + Duration::from_millis(4_999));
        let before = emu.state().vacuum();
        emu.fire_due(t0 + Duration::from_millis(5_000));

        // Assert
        assert_eq!(before, Some(VacuumStatus::Evacuating));
        assert_eq!(emu.state().vacuum(), Some(VacuumStatus::Ready));
        assert_eq!(drain(&mut rx), vec!["VACUUM=2", "VACUUM=3"]);
        assert_eq!(emu.next_deadline(), None);
    }

    #[test]
    fn test_vent_during_evacuation_supersedes_ready() {
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());
        let t0 = Instant::now();

        run(&mut emu, &EVACUATE, t0);
        run(&mut emu, &VENT, t0 + Duration::from_secs(1));
        emu.fire_due(t0 + Duration::from_secs(10));

        assert_eq!(emu.state().vacuum(), Some(VacuumStatus::Off));
        assert_eq!(drain(&mut rx), vec!["VACUUM=2", "VACUUM=0"]);
    }

    #[test]
    fn test_ht_on_refused_without_vacuum() {
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());

        let outcome = run(&mut emu, &HT_ON, Instant::now());

        assert!(!outcome.ok);
        assert_eq!(outcome.device_status, CHECK_CONDITION);
        assert_eq!(outcome.sense.len(), 18);
        assert_eq!(emu.state().ht(), Some(HtStatus::Off));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_ht_off_during_warmup_cancels_on() {
        let config = EmulatorConfig {
            vacuum_ready: true,
            ..EmulatorConfig::default()
        };
        let (mut emu, mut rx) = emulator(config);
        let t0 = Instant::now();
        let mut ht_off = HT_ON;
        ht_off[9] = 0;

        run(&mut emu, &HT_ON, t0);
        run(&mut emu, &ht_off, t0 + Duration::from_millis(500));
        emu.fire_due(t0 + Duration::from_secs(5));

        assert_eq!(emu.state().ht(), Some(HtStatus::Off));
        assert_eq!(drain(&mut rx), vec!["HT_STATE=2", "HT_STATE=0"]);
    }

    #[test]
    fn test_vent_forces_ht_off() {
        let config = EmulatorConfig {
            vacuum_ready: true,
            ..EmulatorConfig::default()
        };
        let (mut emu, mut rx) = emulator(config);
        let t0 = Instant::now();

        run(&mut emu, &HT_ON, t0);
        emu.fire_due(t0 + Duration::from_secs(2));
        run(&mut emu, &VENT, t0 + Duration::from_secs(3));
        emu.fire_due(t0 + Duration::from_secs(6));

        assert_eq!(
            drain(&mut rx),
            vec!["HT_STATE=2", "HT_STATE=5", "HT_STATE=0", "VACUUM=0"]
        );
    }

    #[test]
    fn test_evacuate_while_ht_on_forces_ht_off() {
        // Arrange
        let config = EmulatorConfig {
            vacuum_ready: true,
            ..EmulatorConfig::default()
        };
        let (mut emu, mut rx) = emulator(config);
        let t0 = Instant::now();
        run(&mut emu, &HT_ON, t0);
        emu.fire_due(t0 + Duration::from_secs(3));

        // Act
        assert!(run(&mut emu, &EVACUATE, t0 + Duration::from_secs(4)).ok);

        // Assert
        assert_eq!(emu.state().vacuum(), Some(VacuumStatus::Evacuating));
        assert_eq!(emu.state().ht(), Some(HtStatus::Off));
        assert_eq!(
            drain(&mut rx),
            vec!["HT_STATE=2", "HT_STATE=5", "HT_STATE=0", "VACUUM=2"]
        );
    }

    #[test]
    fn test_evacuate_during_warmup_cancels_ht_on() {
        let config = EmulatorConfig {
            vacuum_ready: true,
            ..EmulatorConfig::default()
        };
        let (mut emu, _rx) = emulator(config);
        let t0 = Instant::now();

        run(&mut emu, &HT_ON, t0);
        run(&mut emu, &EVACUATE, t0 + Duration::from_millis(500));
        emu.fire_due(t0 + Duration::from_secs(3));

        assert_eq!(emu.state().ht(), Some(HtStatus::Off));
        assert_eq!(emu.state().vacuum(), Some(VacuumStatus::Evacuating));
    }

    #[test]
    fn test_alc_sequence_cycles() {
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());
        let t0 = Instant::now();
        let mut alc_vent = EVACUATE;
        alc_vent[6] = 0x3A;
        alc_vent[9] = 0x00;
        let mut alc_evac = alc_vent;
        alc_evac[9] = 0x01;

        run(&mut emu, &alc_evac, t0);
        emu.fire_due(t0 + Duration::from_secs(4));
        run(&mut emu, &alc_vent, t0 + Duration::from_secs(5));
        emu.fire_due(t0 + Duration::from_secs(9));

        assert_eq!(
            drain(&mut rx),
            vec!["ALC_SEQ=1", "ALC_SEQ=2", "ALC_SEQ=3", "ALC_SEQ=0"]
        );
    }

    #[test]
    fn test_tunnel_has_same_effect_as_unwrapped() {
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());
        let request = RequestFrame::write(vec![0xFA, 0x00, 0x00, 0x0A], EVACUATE.to_vec());

        let outcome = emu.execute(&request, Instant::now());

        assert!(outcome.ok);
        assert_eq!(drain(&mut rx), vec!["VACUUM=2"]);
    }

    #[test]
    fn test_reads_and_unknown_opcodes() {
        let (mut emu, _rx) = emulator(EmulatorConfig::default());
        let now = Instant::now();

        assert_eq!(run(&mut emu, &[0xCC, 0x81], now).data, vec![0x0C, 0x17, 0, 0]);
        assert_eq!(run(&mut emu, &[0x12, 0, 0, 0, 0x24, 0], now).data.len(), INQUIRY_LEN);
        assert_eq!(run(&mut emu, &[0xC0, 0x00], now).data.len(), 40);
        assert_eq!(run(&mut emu, &[0xC7, 0x00, 0x00, 0x10], now).data, vec![0; 16]);
        assert_eq!(run(&mut emu, &[0xC5, 0x09], now).data, VALVE_POSITION_REPLY.to_vec());

        let write = run(&mut emu, &[0x55, 0x01], now);
        assert!(write.ok && write.data.is_empty());
    }

    #[test]
    fn test_set_commands_publish_on_change_only() {
        let (mut emu, mut rx) = emulator(EmulatorConfig::default());
        let now = Instant::now();
        let mag = [0x03, 0x01, 0x00, 0x00, 0x06, 0x40, 0x00, 0x00, 0x10, 0xF4, 0x01];

        run(&mut emu, &mag, now);
        run(&mut emu, &mag, now);

        assert_eq!(emu.state().mag_index, 500);
        assert_eq!(drain(&mut rx), vec!["MAG=500"]);
    }
}
