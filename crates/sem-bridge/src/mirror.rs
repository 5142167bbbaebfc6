//! Last-known device values observed by the bridge.
//!
//! The mirror turns observed traffic into edge-triggered events: a value is
//! reported only the first time it is seen and whenever it changes.  It also
//! keeps the previous status block for byte-level diffing.

use std::collections::HashMap;

use sem_core::domain::command::{CommandKind, ReadTarget};
use sem_core::domain::status_block;
use sem_core::{EventKind, StateChangeEvent};

#[derive(Debug, Default)]
pub struct StateMirror {
    known: HashMap<EventKind, i64>,
    last_block: Option<Vec<u8>>,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`, returning it if the value is new.
    pub fn record(&mut self, event: StateChangeEvent) -> Option<StateChangeEvent> {
        let value = event.value?;
        match self.known.insert(event.event, value) {
            Some(previous) if previous == value => None,
            _ => Some(event),
        }
    }

    /// Optimistic update from an outbound "Set" command.
    pub fn observe_command(&mut self, kind: &CommandKind) -> Option<StateChangeEvent> {
        kind.requested_change().and_then(|event| self.record(event))
    }

    /// Update from the reply to a single-field read.
    pub fn observe_read(&mut self, target: ReadTarget, reply: &[u8]) -> Option<StateChangeEvent> {
        let kind = target.event_kind()?;
        let value = ReadTarget::parse_u16(reply)?;
        self.record(StateChangeEvent::new(kind, i64::from(value)))
    }

    /// Update from a full status block read.  Returns the changed values and
    /// the byte-diff detail for the session log.
    pub fn observe_status_block(&mut self, block: &[u8]) -> (Vec<StateChangeEvent>, String) {
        let detail = status_block::describe_diff(self.last_block.as_deref(), block);
        self.last_block = Some(block.to_vec());

        let Some(state) = status_block::decode(block) else {
            return (Vec::new(), format!("{detail} (short block, {} bytes)", block.len()));
        };
        let events = EventKind::ALL
            .into_iter()
            .filter_map(|kind| self.record(StateChangeEvent::new(kind, state.get(kind))))
            .collect();
        (events, detail)
    }

    pub fn known(&self, kind: EventKind) -> Option<i64> {
        self.known.get(&kind).copied()
    }
}
