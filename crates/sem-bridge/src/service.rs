//! The bridge's [`TransactionHandler`]: relays each request to the
//! instrument and mirrors the state changes it observes on the way.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use sem_core::domain::command::{classify, CommandKind};
use sem_core::domain::hex_bytes;
use sem_core::{Direction, RequestFrame, StateChangeEvent, TransactionOutcome};
use sem_server::config::BridgeConfig;
use sem_server::{StatePublisher, TransactionHandler};

use crate::channel::DeviceChannel;
use crate::intercept::InterceptionPolicy;
use crate::mirror::StateMirror;
use crate::passthrough::{PassthroughReply, PassthroughRequest};

pub struct BridgeService {
    channel: DeviceChannel,
    policy: InterceptionPolicy,
    mirror: Mutex<StateMirror>,
    publisher: StatePublisher,
    timeout: Duration,
    max_transfer: u32,
}

impl BridgeService {
    pub fn new(
        channel: DeviceChannel,
        policy: InterceptionPolicy,
        publisher: StatePublisher,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            channel,
            policy,
            mirror: Mutex::new(StateMirror::new()),
            publisher,
            timeout: Duration::from_millis(u64::from(config.timeout_ms)),
            max_transfer: config.max_transfer,
        }
    }

    fn with_mirror<T>(&self, f: impl FnOnce(&mut StateMirror) -> T) -> T {
        let mut mirror = self.mirror.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut mirror)
    }

    fn publish(&self, event: Option<StateChangeEvent>) {
        if let Some(event) = event {
            debug!(%event, "state change observed");
            self.publisher.publish(event);
        }
    }

    /// Optimistic update from an outbound "Set", including one carried
    /// inside a tunnel payload.
    fn sniff_command(&self, request: &RequestFrame, kind: &CommandKind) {
        let inner = match kind {
            CommandKind::Tunnel if request.direction == Direction::HostToDevice => {
                Some(classify(&request.payload))
            }
            _ => None,
        };
        for kind in std::iter::once(kind).chain(inner.as_ref()) {
            let event = self.with_mirror(|m| m.observe_command(kind));
            self.publish(event);
        }
    }

    /// Mirror update from the reply to a "Get".  Returns extra detail for
    /// the session log.
    fn sniff_reply(&self, kind: &CommandKind, data: &[u8]) -> Option<String> {
        match *kind {
            CommandKind::Read(target) => {
                let event = self.with_mirror(|m| m.observe_read(target, data));
                self.publish(event);
                None
            }
            CommandKind::StatusBlock => {
                let (events, detail) = self.with_mirror(|m| m.observe_status_block(data));
                self.publisher.publish_all(events);
                Some(detail)
            }
            _ => None,
        }
    }

    fn passthrough_request(&self, request: &RequestFrame) -> PassthroughRequest {
        let (outbound, inbound_len) = match request.direction {
            Direction::HostToDevice => (request.payload.clone(), 0),
            Direction::DeviceToHost => (Vec::new(), request.transfer_len as usize),
            Direction::None => (Vec::new(), 0),
        };
        PassthroughRequest {
            cdb: request.cdb.clone(),
            direction: request.direction,
            outbound,
            inbound_len,
            timeout: self.timeout,
        }
    }
}

fn rejected(reply: PassthroughReply) -> TransactionOutcome {
    let detail = reply.status_detail();
    TransactionOutcome {
        device_status: reply.device_status,
        host_status: reply.host_status,
        driver_status: reply.driver_status,
        sense: reply.sense,
        ..TransactionOutcome::failed(detail)
    }
}

#[async_trait]
impl TransactionHandler for BridgeService {
    async fn execute(&self, request: &RequestFrame) -> TransactionOutcome {
        if let Some(rule) = self.policy.lookup(&request.cdb) {
            debug!(label = %rule.label, "command intercepted");
            return TransactionOutcome::ok(rule.response.clone())
                .with_detail(format!("intercepted: {}", rule.label));
        }

        let kind = classify(&request.cdb);
        self.sniff_command(request, &kind);

        if request.transfer_len > self.max_transfer {
            return TransactionOutcome::failed(format!(
                "transfer length {} exceeds limit {}",
                request.transfer_len, self.max_transfer
            ));
        }

        let reply = match self.channel.submit(self.passthrough_request(request)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "passthrough failed");
                return TransactionOutcome::failed(format!("passthrough failed: {e}"));
            }
        };
        if !reply.is_good() {
            warn!(status = %reply.status_detail(), cdb = %hex_bytes(&request.cdb), "device rejected command");
            return rejected(reply);
        }

        let detail = self.sniff_reply(&kind, &reply.data);
        let outcome = TransactionOutcome::ok(reply.data);
        match detail {
            Some(detail) => outcome.with_detail(detail),
            None => outcome,
        }
    }
}
