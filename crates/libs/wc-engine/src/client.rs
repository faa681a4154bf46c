use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::history::JsonRpcHistory;
use crate::pairing::PairingEngine;
use crate::relay::RelayEvent;
use crate::session::SessionEngine;
use crate::store::SequenceStore;
use crate::subscriber::Subscriber;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::broadcast;
use wc_core::jsonrpc::reason;
use wc_core::{
    Clock, ExpirableSequence, JsonRpcRecord, JsonRpcRequest, KeyAgreementService,
    KeyValueStorage, Pairing, Session, StorageError, SystemClock, WcMethod,
};

/// One peer: both engines over a shared relay, store and event bus.
pub struct Client {
    ctx: Arc<EngineContext>,
    pairing: PairingEngine,
    session: SessionEngine,
}

impl Client {
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn KeyValueStorage>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = Arc::new(EngineContext::new(config, storage, transport, clock));
        Self {
            pairing: PairingEngine::new(ctx.clone()),
            session: SessionEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Opens the configured store and runs on the system clock.
    pub fn from_config(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Runtime)?;
        let storage = config.open_storage()?;
        Ok(Self::new(config, storage, transport, Arc::new(SystemClock)))
    }

    pub fn pairing(&self) -> &PairingEngine {
        &self.pairing
    }

    pub fn session(&self) -> &SessionEngine {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn crypto(&self) -> &KeyAgreementService {
        &self.ctx.crypto
    }

    pub fn history(&self) -> &JsonRpcHistory {
        &self.ctx.history
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.ctx.subscriber
    }

    pub fn pairings(&self) -> &SequenceStore<Pairing> {
        &self.ctx.pairings
    }

    pub fn sessions(&self) -> &SequenceStore<Session> {
        &self.ctx.sessions
    }

    /// Resubscribes every live topic found in storage. Expired entries are
    /// reaped on the way. Returns the number of topics subscribed.
    pub fn restore(&self) -> Result<usize, EngineError> {
        let mut topics = Vec::new();
        for pairing in self.ctx.pairings.get_all()? {
            topics.push(pairing.topic().to_string());
        }
        for session in self.ctx.sessions.get_all()? {
            topics.push(session.topic().to_string());
        }
        topics.sort();
        topics.dedup();
        for topic in &topics {
            self.ctx.subscriber.set_subscription(topic)?;
        }
        log::info!("restored {} topic subscriptions", topics.len());
        Ok(topics.len())
    }

    /// Entry point for every message the relay delivers.
    pub fn handle_transport_message(&self, topic: &str, message: &str) -> Result<(), EngineError> {
        let Some(payload) = self.ctx.subscriber.receive(topic, message) else {
            return Ok(());
        };
        let event = match self.ctx.relay.handle_payload(&payload) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()),
            Err(err) => {
                log::warn!("dropping inbound message on {topic}: {err}");
                return Err(err);
            }
        };
        match event {
            RelayEvent::Request { topic, request } => self.route_request(&topic, &request),
            RelayEvent::Response { record, .. } => self.route_response(&record),
        }
    }

    fn route_request(&self, topic: &str, request: &JsonRpcRequest) -> Result<(), EngineError> {
        log::debug!("inbound {} id={} on {topic}", request.method, request.id);
        let Some(method) = request.wc_method() else {
            return self.method_not_found(topic, request);
        };
        match method {
            WcMethod::PairingApprove => self.pairing.on_approve_request(topic, request),
            WcMethod::PairingPayload => match self.pairing.on_payload(topic, request)? {
                Some(inner) if inner.method == WcMethod::SessionPropose.as_str() => {
                    self.session.on_proposal(topic, request.id, inner.params)
                }
                Some(_) => self.method_not_found(topic, request),
                None => Ok(()),
            },
            WcMethod::PairingPing => self.pairing.on_ping(topic, request),
            WcMethod::PairingDelete => self.pairing.on_delete(topic, request),
            WcMethod::SessionApprove => self.session.on_approve_request(topic, request),
            WcMethod::SessionReject => self.session.on_reject(topic, request),
            WcMethod::SessionUpdate => self.session.on_update(topic, request),
            WcMethod::SessionUpgrade => self.session.on_upgrade(topic, request),
            WcMethod::SessionDelete => self.session.on_delete(topic, request),
            WcMethod::SessionPayload => self.session.on_payload(topic, request),
            WcMethod::SessionPing => self.session.on_ping(topic, request),
            WcMethod::SessionNotification => self.session.on_notification(topic, request),
            // Proposals only travel inside a pairing payload.
            WcMethod::SessionPropose => self.method_not_found(topic, request),
        }
    }

    fn route_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        let Some(response) = &record.response else {
            return Ok(());
        };
        match record.request.wc_method() {
            Some(WcMethod::PairingApprove) => self.pairing.on_approve_response(record),
            Some(WcMethod::PairingPayload) => self.session.on_propose_response(record),
            Some(WcMethod::SessionApprove) => self.session.on_approve_response(record),
            Some(WcMethod::SessionUpdate) => self.session.on_update_response(record),
            Some(WcMethod::SessionUpgrade) => self.session.on_upgrade_response(record),
            Some(WcMethod::SessionPayload) => {
                self.session.on_payload_response(record);
                Ok(())
            }
            Some(method @ (WcMethod::PairingPing | WcMethod::SessionPing))
                if !response.is_error() =>
            {
                let kind =
                    if method == WcMethod::PairingPing { Pairing::KIND } else { Session::KIND };
                self.ctx.events.emit_event(EngineEvent::Pong { topic: record.topic.clone(), kind });
                Ok(())
            }
            _ => {
                if let Some(error) = &response.error {
                    self.ctx.request_failed(record, error.clone());
                }
                Ok(())
            }
        }
    }

    fn method_not_found(&self, topic: &str, request: &JsonRpcRequest) -> Result<(), EngineError> {
        self.ctx.respond_error(
            topic,
            request.id,
            reason::METHOD_NOT_FOUND,
            format!("unsupported method {}", request.method),
        )
    }

    /// Purges expired pairings and sessions. Returns how many were removed.
    pub fn sweep_expired(&self) -> Result<usize, StorageError> {
        let pairings = self.ctx.pairings.sweep_expired()?.len();
        let sessions = self.ctx.sessions.sweep_expired()?.len();
        if pairings + sessions > 0 {
            log::info!("expired {pairings} pairings and {sessions} sessions");
        }
        Ok(pairings + sessions)
    }

    pub fn take_event(&self) -> Option<EngineEvent> {
        self.ctx.events.take_event()
    }

    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.ctx.events.drain()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.ctx.events.subscribe_events()
    }
}
