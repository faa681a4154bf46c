use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use wc_core::params::SessionProposal;
use wc_core::{JsonRpcError, JsonRpcResponse, Pairing, Reason, Session, SessionPermissions};

const EVENT_QUEUE_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// Proposer side: the peer approved our pairing URI.
    PairingApproved { pairing: Pairing },
    /// Responder side: the proposer acknowledged our approval.
    PairingAcknowledged { pairing: Pairing },
    PairingApprovalFailed { topic: String, reason: String },
    PairingDeleted { topic: String, reason: Reason },
    SessionProposal { proposal: SessionProposal },
    /// Proposer side: the peer approved our session proposal.
    SessionApproved { session: Session },
    /// Responder side: the proposer acknowledged our session approval.
    SessionSettled { session: Session },
    SessionApprovalFailed { topic: String, reason: String },
    SessionRejected { topic: String, reason: Reason },
    SessionUpdated { topic: String, accounts: Vec<String> },
    SessionUpgraded { topic: String, permissions: SessionPermissions },
    SessionDeleted { topic: String, reason: Reason },
    SessionPayload {
        topic: String,
        request_id: i64,
        method: String,
        params: JsonValue,
        chain_id: Option<String>,
    },
    SessionPayloadResponse { topic: String, response: JsonRpcResponse },
    SessionNotification { topic: String, kind: String, data: JsonValue },
    Pong { topic: String, kind: &'static str },
    RequestFailed { topic: String, method: String, error: JsonRpcError },
    SequenceExpired { topic: String, kind: &'static str },
}

/// Bounded poll queue plus a broadcast fan-out for live listeners.
pub struct EventBus {
    events: broadcast::Sender<EngineEvent>,
    event_queue: Mutex<VecDeque<EngineEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events, event_queue: Mutex::new(VecDeque::with_capacity(EVENT_QUEUE_CAPACITY)) }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn take_event(&self) -> Option<EngineEvent> {
        let mut guard = self.event_queue.lock().expect("event_queue mutex poisoned");
        guard.pop_front()
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut guard = self.event_queue.lock().expect("event_queue mutex poisoned");
        guard.drain(..).collect()
    }

    pub fn push_event(&self, event: EngineEvent) {
        let mut guard = self.event_queue.lock().expect("event_queue mutex poisoned");
        if guard.len() >= EVENT_QUEUE_CAPACITY {
            if let Some(dropped) = guard.pop_front() {
                log::warn!("event queue full, dropping oldest event {dropped:?}");
            }
        }
        guard.push_back(event);
    }

    pub fn emit_event(&self, event: EngineEvent) {
        log::debug!("engine event {event:?}");
        self.push_event(event.clone());
        let _ = self.events.send(event);
    }
}
