use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::history::JsonRpcHistory;
use crate::pairing::ApprovalClaims;
use crate::relay::Relay;
use crate::store::{ExpirationObserver, SequenceStore};
use crate::subscriber::Subscriber;
use crate::transport::Transport;
use serde_json::json;
use std::sync::Arc;
use wc_core::jsonrpc::reason;
use wc_core::{
    AgreementPublicKey, Clock, ExpirableSequence, JsonRpcError, JsonRpcRecord, JsonRpcResponse,
    KeyAgreementService, KeyValueStorage, Pairing, Session,
};

pub(crate) const PAIRINGS_KEY: &str = "wc.sequences.pairings";
pub(crate) const SESSIONS_KEY: &str = "wc.sequences.sessions";

/// Services shared by both engines. Built once by [`crate::Client`].
pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) crypto: Arc<KeyAgreementService>,
    pub(crate) history: Arc<JsonRpcHistory>,
    pub(crate) subscriber: Arc<Subscriber>,
    pub(crate) relay: Relay,
    pub(crate) pairings: SequenceStore<Pairing>,
    pub(crate) sessions: SequenceStore<Session>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) approvals: Arc<ApprovalClaims>,
}

impl EngineContext {
    pub(crate) fn new(
        config: EngineConfig,
        storage: Arc<dyn KeyValueStorage>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let crypto = Arc::new(KeyAgreementService::new(storage.clone()));
        let history = Arc::new(JsonRpcHistory::new(storage.clone()));
        let subscriber = Arc::new(Subscriber::new(transport.clone()));
        let events = Arc::new(EventBus::new());
        let approvals = Arc::new(ApprovalClaims::default());
        let reaper = Arc::new(SequenceReaper {
            crypto: crypto.clone(),
            history: history.clone(),
            subscriber: subscriber.clone(),
            events: events.clone(),
            approvals: approvals.clone(),
        });
        let pairings =
            SequenceStore::<Pairing>::new(storage.clone(), PAIRINGS_KEY, clock.clone())
                .with_observer(reaper.clone());
        let sessions = SequenceStore::<Session>::new(storage, SESSIONS_KEY, clock.clone())
            .with_observer(reaper);
        let relay = Relay::new(transport, crypto.clone(), history.clone());
        Self {
            config,
            clock,
            crypto,
            history,
            subscriber,
            relay,
            pairings,
            sessions,
            events,
            approvals,
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    pub(crate) fn respond_ok(&self, topic: &str, id: i64) -> Result<(), EngineError> {
        self.relay.respond(topic, &JsonRpcResponse::success(id, json!(true)))
    }

    pub(crate) fn respond_error(
        &self,
        topic: &str,
        id: i64,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), EngineError> {
        let message = message.into();
        log::debug!("rejecting request {id} on {topic} with {code}: {message}");
        self.relay.respond(topic, &JsonRpcResponse::failure(id, code, message))
    }

    pub(crate) fn respond_invalid(
        &self,
        topic: &str,
        id: i64,
        err: impl std::fmt::Display,
    ) -> Result<(), EngineError> {
        self.respond_error(topic, id, reason::INVALID_REQUEST, err.to_string())
    }

    pub(crate) fn request_failed(&self, record: &JsonRpcRecord, error: JsonRpcError) {
        log::debug!(
            "{} id={} on {} failed: {}",
            record.request.method,
            record.id,
            record.topic,
            error.message
        );
        self.events.emit_event(EngineEvent::RequestFailed {
            topic: record.topic.clone(),
            method: record.request.method.clone(),
            error,
        });
    }

    /// Drops the subscription, agreement secret and JSON-RPC history of a
    /// topic. Failures are logged; teardown always runs to completion.
    pub(crate) fn release_topic(&self, topic: &str) {
        release_topic(&self.subscriber, &self.crypto, &self.history, topic);
    }

    pub(crate) fn forget_key(&self, public_key: &AgreementPublicKey) {
        if let Err(err) = self.crypto.delete_private_key(public_key) {
            log::warn!("could not delete private key {public_key:?}: {err}");
        }
    }
}

fn release_topic(
    subscriber: &Subscriber,
    crypto: &KeyAgreementService,
    history: &JsonRpcHistory,
    topic: &str,
) {
    if let Err(err) = subscriber.remove_subscription(topic) {
        log::warn!("unsubscribe from {topic} failed: {err}");
    }
    if let Err(err) = crypto.delete_agreement(topic) {
        log::warn!("could not delete agreement for {topic}: {err}");
    }
    if let Err(err) = history.delete(topic) {
        log::warn!("could not delete history for {topic}: {err}");
    }
}

/// Cleans up after sequences that expire on read or during a sweep.
struct SequenceReaper {
    crypto: Arc<KeyAgreementService>,
    history: Arc<JsonRpcHistory>,
    subscriber: Arc<Subscriber>,
    events: Arc<EventBus>,
    approvals: Arc<ApprovalClaims>,
}

impl SequenceReaper {
    fn reap(&self, kind: &'static str, topic: &str, self_public_key: &AgreementPublicKey) {
        release_topic(&self.subscriber, &self.crypto, &self.history, topic);
        if let Err(err) = self.crypto.delete_private_key(self_public_key) {
            log::warn!("could not delete private key for expired {kind} {topic}: {err}");
        }
        self.events.emit_event(EngineEvent::SequenceExpired { topic: topic.to_string(), kind });
    }
}

impl ExpirationObserver<Pairing> for SequenceReaper {
    fn sequence_expired(&self, sequence: &Pairing) {
        self.approvals.forget(sequence.topic());
        self.reap(Pairing::KIND, sequence.topic(), &sequence.self_public_key);
    }
}

impl ExpirationObserver<Session> for SequenceReaper {
    fn sequence_expired(&self, sequence: &Session) {
        self.reap(Session::KIND, sequence.topic(), &sequence.self_public_key);
    }
}
