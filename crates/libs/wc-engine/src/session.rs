//! Session negotiation and settled-session traffic.
//!
//! A proposal travels as `wc_sessionPropose` wrapped in `wc_pairingPayload`
//! over a settled pairing and names a fresh proposal topic C. The responder
//! derives the settled topic D and publishes `wc_sessionApprove` on C; once
//! the proposer answers, both sides hold D as `Settled`. Only the controller
//! may change accounts or permissions of a settled session.

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::EngineEvent;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use wc_core::caip::validate_accounts;
use wc_core::jsonrpc::reason;
use wc_core::lifecycle::ensure_operation_legal;
use wc_core::params::{
    DeleteParams, PairingPayloadParams, Participant, PayloadRequest, PingParams, ProposalSignal,
    Proposer, SessionApproveParams, SessionNotificationParams, SessionPayloadParams,
    SessionProposal, SessionRejectParams, SessionStateParams, SessionUpdateParams,
    SessionUpgradeParams,
};
use wc_core::{
    AgreementPublicKey, JsonRpcRecord, JsonRpcRequest, JsonRpcResponse, KeyAgreementService,
    ProtocolError, Reason, RelayProtocolOptions, Session, SessionOperation, SessionPermissions,
    SessionState, StorageError, WcMethod,
};

pub struct SessionEngine {
    ctx: Arc<EngineContext>,
}

impl SessionEngine {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Proposes a session to the peer of a settled pairing. The proposal topic
    /// is subscribed and stored before anything is published.
    pub fn propose(
        &self,
        pairing_topic: &str,
        permissions: SessionPermissions,
        relay: Option<RelayProtocolOptions>,
    ) -> Result<SessionProposal, EngineError> {
        permissions.validate()?;
        let ctx = &self.ctx;
        let pairing = ctx.pairings.get_sequence(pairing_topic)?;
        if !pairing.state.is_settled() {
            return Err(ProtocolError::PairingNotSettled(pairing_topic.to_string()).into());
        }
        let propose = WcMethod::SessionPropose.as_str();
        if !pairing.permissions.allows(propose) {
            return Err(ProtocolError::UnauthorizedMethod(propose.to_string()).into());
        }

        let relay = relay.unwrap_or_else(|| ctx.config.relay.clone());
        let public_key = ctx.crypto.generate_key_pair()?;
        let proposal = SessionProposal {
            topic: KeyAgreementService::random_topic(),
            relay: relay.clone(),
            proposer: Proposer {
                public_key,
                controller: ctx.config.controller,
                metadata: ctx.config.metadata.clone(),
            },
            signal: ProposalSignal::pairing(pairing_topic),
            permissions: permissions.clone(),
            ttl: ctx.config.session_ttl.settled,
        };
        let session = Session {
            topic: proposal.topic.clone(),
            expiry: ctx.now() + ctx.config.session_ttl.proposed,
            state: SessionState::Proposed,
            self_public_key: public_key,
            peer_public_key: None,
            relay,
            is_controller: ctx.config.controller,
            permissions,
            accounts: Vec::new(),
            pairing_topic: pairing_topic.to_string(),
            peer_metadata: None,
            proposal: Some(proposal.clone()),
            settled_topic: None,
        };

        if let Err(err) = self.try_propose(session, &proposal) {
            log::warn!("proposing session on pairing {pairing_topic} failed: {err}");
            self.discard(&proposal.topic, None, &public_key);
            return Err(err);
        }
        log::info!("proposed session {} over pairing {pairing_topic}", proposal.topic);
        Ok(proposal)
    }

    fn try_propose(&self, session: Session, proposal: &SessionProposal) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        ctx.sessions.set_sequence(session)?;
        ctx.subscriber.set_subscription(&proposal.topic)?;
        let inner = JsonRpcRequest::new(WcMethod::SessionPropose, proposal)?;
        let payload = PairingPayloadParams {
            request: PayloadRequest { method: inner.method, params: inner.params },
        };
        let request = JsonRpcRequest::new(WcMethod::PairingPayload, &payload)?;
        ctx.relay.request(proposal.pairing_topic(), &request)
    }

    pub fn approve(
        &self,
        proposal: &SessionProposal,
        accounts: Vec<String>,
    ) -> Result<Session, EngineError> {
        validate_accounts(&accounts)?;
        proposal.permissions.validate()?;
        self.check_ttl(proposal.ttl)?;
        let ctx = &self.ctx;
        let pairing = ctx.pairings.get_sequence(proposal.pairing_topic())?;
        if !pairing.state.is_settled() {
            return Err(ProtocolError::PairingNotSettled(pairing.topic).into());
        }
        if let Some(existing) = self.lookup(&proposal.topic)? {
            return Err(ProtocolError::InvalidStateTransition {
                from: existing.state.as_str(),
                to: SessionState::Responded.as_str(),
            }
            .into());
        }

        let public_key = ctx.crypto.generate_key_pair()?;
        let mut settled_topic = None;
        match self.try_approve(proposal, accounts, &public_key, &mut settled_topic) {
            Ok(session) => Ok(session),
            Err(err) => {
                log::warn!("approving session {} failed: {err}", proposal.topic);
                self.discard(&proposal.topic, settled_topic.as_deref(), &public_key);
                Err(err)
            }
        }
    }

    fn try_approve(
        &self,
        proposal: &SessionProposal,
        accounts: Vec<String>,
        public_key: &AgreementPublicKey,
        settled_topic: &mut Option<String>,
    ) -> Result<Session, EngineError> {
        let ctx = &self.ctx;
        let (derived, _) =
            ctx.crypto.create_agreement(public_key, &proposal.proposer.public_key.to_hex())?;
        *settled_topic = Some(derived.clone());

        let now = ctx.now();
        let responded = Session {
            topic: proposal.topic.clone(),
            expiry: now + ctx.config.session_ttl.pending,
            state: SessionState::Responded,
            self_public_key: *public_key,
            peer_public_key: Some(proposal.proposer.public_key),
            relay: proposal.relay.clone(),
            is_controller: !proposal.proposer.controller,
            permissions: proposal.permissions.clone(),
            accounts: accounts.clone(),
            pairing_topic: proposal.pairing_topic().to_string(),
            peer_metadata: proposal.proposer.metadata.clone(),
            proposal: Some(proposal.clone()),
            settled_topic: Some(derived.clone()),
        };
        let pre_settled = Session {
            topic: derived.clone(),
            state: SessionState::PreSettled,
            proposal: None,
            settled_topic: None,
            ..responded.clone()
        };
        ctx.sessions.set_sequence(responded)?;
        ctx.sessions.set_sequence(pre_settled.clone())?;
        ctx.subscriber.set_subscription(&proposal.topic)?;
        ctx.subscriber.set_subscription(&derived)?;

        let expiry =
            now.checked_add(proposal.ttl).ok_or(ProtocolError::InvalidTtl(proposal.ttl))?;
        let params = SessionApproveParams {
            relay: proposal.relay.clone(),
            responder: Participant {
                public_key: *public_key,
                metadata: ctx.config.metadata.clone(),
            },
            expiry,
            state: SessionStateParams { accounts },
        };
        let request = JsonRpcRequest::new(WcMethod::SessionApprove, &params)?;
        ctx.relay.request(&proposal.topic, &request)?;
        log::info!("approved session {} as {derived}", proposal.topic);
        Ok(pre_settled)
    }

    /// Declines a proposal. The responder never subscribed to the proposal
    /// topic, so only the outbound record needs dropping.
    pub fn reject(&self, proposal: &SessionProposal, reason: Reason) -> Result<(), EngineError> {
        let params = SessionRejectParams { reason };
        let request = JsonRpcRequest::new(WcMethod::SessionReject, &params)?;
        self.ctx.relay.request(&proposal.topic, &request)?;
        self.ctx.history.delete(&proposal.topic)?;
        log::info!("rejected session proposal {}", proposal.topic);
        Ok(())
    }

    /// Publishes new accounts for a controlled session and returns the
    /// request id. The stored accounts change once the peer acknowledges;
    /// a refusal leaves them as they were.
    pub fn update(&self, topic: &str, accounts: Vec<String>) -> Result<i64, EngineError> {
        let session = self.controlled(SessionOperation::Update, topic)?;
        validate_accounts(&accounts)?;
        let params = SessionUpdateParams { state: SessionStateParams { accounts } };
        let request = JsonRpcRequest::new(WcMethod::SessionUpdate, &params)?;
        self.ctx.relay.request(&session.topic, &request)?;
        Ok(request.id)
    }

    /// Requests additional permissions for a controlled session. Once the
    /// peer acknowledges, the stored set becomes the union of the current and
    /// the requested permissions.
    pub fn upgrade(
        &self,
        topic: &str,
        permissions: SessionPermissions,
    ) -> Result<i64, EngineError> {
        let session = self.controlled(SessionOperation::Upgrade, topic)?;
        permissions.validate()?;
        let request =
            JsonRpcRequest::new(WcMethod::SessionUpgrade, &SessionUpgradeParams { permissions })?;
        self.ctx.relay.request(&session.topic, &request)?;
        Ok(request.id)
    }

    pub fn delete(&self, topic: &str, reason: Reason) -> Result<(), EngineError> {
        let session = self.ctx.sessions.get_sequence(topic)?;
        ensure_operation_legal(SessionOperation::Delete, session.state, topic)?;
        let notified =
            JsonRpcRequest::new(WcMethod::SessionDelete, &DeleteParams { reason: reason.clone() })
                .map_err(EngineError::from)
                .and_then(|request| self.ctx.relay.request(topic, &request));
        self.teardown(&session);
        let topic = topic.to_string();
        self.ctx.events.emit_event(EngineEvent::SessionDeleted { topic, reason });
        notified
    }

    pub fn ping(&self, topic: &str) -> Result<i64, EngineError> {
        let session = self.legal(SessionOperation::Ping, topic)?;
        let request = JsonRpcRequest::new(WcMethod::SessionPing, &PingParams::default())?;
        self.ctx.relay.request(&session.topic, &request)?;
        Ok(request.id)
    }

    pub fn notify(&self, topic: &str, kind: &str, data: JsonValue) -> Result<(), EngineError> {
        let session = self.legal(SessionOperation::Notify, topic)?;
        if !session.permissions.allows_notification(kind) {
            return Err(ProtocolError::UnauthorizedNotification(kind.to_string()).into());
        }
        let params = SessionNotificationParams { kind: kind.to_string(), data };
        let request = JsonRpcRequest::new(WcMethod::SessionNotification, &params)?;
        self.ctx.relay.request(&session.topic, &request)
    }

    /// Sends an application request and returns its JSON-RPC id. The answer
    /// arrives as [`EngineEvent::SessionPayloadResponse`].
    pub fn request(
        &self,
        topic: &str,
        method: &str,
        params: JsonValue,
        chain_id: Option<String>,
    ) -> Result<i64, EngineError> {
        let session = self.legal(SessionOperation::Payload, topic)?;
        if !session.permissions.allows_method(method) {
            return Err(ProtocolError::UnauthorizedMethod(method.to_string()).into());
        }
        if let Some(chain_id) = &chain_id {
            if !session.permissions.allows_chain(chain_id) {
                return Err(ProtocolError::InvalidPermissions(format!(
                    "chain {chain_id} is not permitted"
                ))
                .into());
            }
        }
        let params = SessionPayloadParams {
            request: PayloadRequest { method: method.to_string(), params },
            chain_id,
        };
        let request = JsonRpcRequest::new(WcMethod::SessionPayload, &params)?;
        self.ctx.relay.request(&session.topic, &request)?;
        Ok(request.id)
    }

    /// Answers an inbound application request.
    pub fn respond(&self, topic: &str, response: &JsonRpcResponse) -> Result<(), EngineError> {
        self.ctx.sessions.get_sequence(topic)?;
        self.ctx.relay.respond(topic, response)
    }

    pub fn get_session(&self, topic: &str) -> Result<Session, EngineError> {
        self.ctx.sessions.get_sequence(topic)
    }

    pub fn get_sessions(&self) -> Result<Vec<Session>, StorageError> {
        self.ctx.sessions.get_all()
    }

    pub fn get_settled_sessions(&self) -> Result<Vec<Session>, StorageError> {
        Ok(self.get_sessions()?.into_iter().filter(Session::is_settled).collect())
    }

    pub(crate) fn on_proposal(
        &self,
        pairing_topic: &str,
        request_id: i64,
        params: JsonValue,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let proposal: SessionProposal = match serde_json::from_value(params) {
            Ok(proposal) => proposal,
            Err(err) => {
                return ctx.respond_error(
                    pairing_topic,
                    request_id,
                    reason::INVALID_SESSION_PROPOSE,
                    err.to_string(),
                )
            }
        };
        if let Err(err) =
            proposal.permissions.validate().and_then(|()| self.check_ttl(proposal.ttl))
        {
            return ctx.respond_error(
                pairing_topic,
                request_id,
                reason::INVALID_SESSION_PROPOSE,
                err.to_string(),
            );
        }
        if proposal.pairing_topic() != pairing_topic {
            return ctx.respond_error(
                pairing_topic,
                request_id,
                reason::INVALID_SESSION_PROPOSE,
                format!("proposal signals pairing {}", proposal.pairing_topic()),
            );
        }
        ctx.respond_ok(pairing_topic, request_id)?;
        log::info!("session proposal {} received over {pairing_topic}", proposal.topic);
        ctx.events.emit_event(EngineEvent::SessionProposal { proposal });
        Ok(())
    }

    pub(crate) fn on_propose_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        let Some(error) = record.response.as_ref().and_then(|response| response.error.clone())
        else {
            return Ok(());
        };
        let proposal_topic = record
            .request
            .parse_params::<PairingPayloadParams>()
            .ok()
            .and_then(|payload| {
                serde_json::from_value::<SessionProposal>(payload.request.params).ok()
            })
            .map(|proposal| proposal.topic);
        if let Some(proposal_topic) = proposal_topic {
            if let Some(session) = self.lookup(&proposal_topic)? {
                log::warn!("session proposal {proposal_topic} refused: {}", error.message);
                self.teardown(&session);
            }
        }
        self.ctx.request_failed(record, error);
        Ok(())
    }

    pub(crate) fn on_approve_request(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let params = match request
            .parse_params::<SessionApproveParams>()
            .and_then(|params| validate_accounts(&params.state.accounts).map(|()| params))
        {
            Ok(params) => params,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };
        let proposed = match self.lookup(topic)? {
            Some(session) if session.state == SessionState::Proposed => session,
            Some(session) => {
                return ctx.respond_error(
                    topic,
                    request.id,
                    reason::INVALID_REQUEST,
                    format!("session {topic} is {}", session.state.as_str()),
                )
            }
            None => return self.respond_unknown(topic, request.id),
        };
        if params.expiry <= ctx.now() {
            return ctx.respond_error(
                topic,
                request.id,
                reason::INVALID_REQUEST,
                "session expiry is in the past",
            );
        }
        let settled_topic = match ctx
            .crypto
            .create_agreement(&proposed.self_public_key, &params.responder.public_key.to_hex())
        {
            Ok((settled_topic, _)) => settled_topic,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };

        ctx.subscriber.set_subscription(&settled_topic)?;
        let session = Session {
            topic: settled_topic.clone(),
            expiry: params.expiry,
            state: SessionState::Settled,
            self_public_key: proposed.self_public_key,
            peer_public_key: Some(params.responder.public_key),
            relay: params.relay,
            is_controller: proposed.is_controller,
            permissions: proposed.permissions,
            accounts: params.state.accounts,
            pairing_topic: proposed.pairing_topic,
            peer_metadata: params.responder.metadata,
            proposal: None,
            settled_topic: None,
        };
        ctx.sessions.set_sequence(session.clone())?;
        ctx.sessions.delete(topic)?;
        ctx.respond_ok(topic, request.id)?;
        ctx.release_topic(topic);
        log::info!("session {topic} settled as {settled_topic}");
        ctx.events.emit_event(EngineEvent::SessionApproved { session });
        Ok(())
    }

    pub(crate) fn on_approve_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let proposal_topic = record.topic.as_str();
        let Some(response) = &record.response else {
            return Ok(());
        };
        let Some(responded) = self.lookup(proposal_topic)? else {
            log::warn!("approval answer for unknown session {proposal_topic}");
            return Ok(());
        };

        if let Some(error) = &response.error {
            log::warn!("session {proposal_topic} refused by peer: {}", error.message);
            self.teardown(&responded);
            ctx.events.emit_event(EngineEvent::SessionApprovalFailed {
                topic: proposal_topic.to_string(),
                reason: error.message.clone(),
            });
            return Ok(());
        }

        let settled_topic = responded
            .settled_topic
            .ok_or_else(|| ProtocolError::NoSequenceForTopic(format!("{proposal_topic}/settled")))?;
        let params: SessionApproveParams = record.request.parse_params()?;
        let session = ctx.sessions.update(&settled_topic, |session| {
            session.advance(SessionState::Settled)?;
            session.expiry = params.expiry;
            Ok(())
        })?;
        ctx.sessions.delete(proposal_topic)?;
        ctx.release_topic(proposal_topic);
        log::info!("session {settled_topic} settled");
        ctx.events.emit_event(EngineEvent::SessionSettled { session });
        Ok(())
    }

    pub(crate) fn on_reject(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        let params: SessionRejectParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return self.ctx.respond_invalid(topic, request.id, err),
        };
        self.ctx.respond_ok(topic, request.id)?;
        self.teardown(&session);
        log::info!("session proposal {topic} rejected: {}", params.reason.message);
        let topic = topic.to_string();
        self.ctx.events.emit_event(EngineEvent::SessionRejected { topic, reason: params.reason });
        Ok(())
    }

    pub(crate) fn on_update(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        if !session.is_settled() || session.is_controller {
            return ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_UPDATE,
                format!("peer may not update session {topic}"),
            );
        }
        let params = match request
            .parse_params::<SessionUpdateParams>()
            .and_then(|params| validate_accounts(&params.state.accounts).map(|()| params))
        {
            Ok(params) => params,
            Err(err) => {
                return ctx.respond_error(
                    topic,
                    request.id,
                    reason::INVALID_SESSION_UPDATE,
                    err.to_string(),
                )
            }
        };
        let accounts = params.state.accounts;
        let stored = accounts.clone();
        ctx.sessions.update(topic, |session| {
            session.accounts = stored;
            Ok(())
        })?;
        ctx.respond_ok(topic, request.id)?;
        ctx.events.emit_event(EngineEvent::SessionUpdated { topic: topic.to_string(), accounts });
        Ok(())
    }

    pub(crate) fn on_upgrade(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        if !session.is_settled() || session.is_controller {
            return ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_UPGRADE,
                format!("peer may not upgrade session {topic}"),
            );
        }
        let params = match request
            .parse_params::<SessionUpgradeParams>()
            .and_then(|params| params.permissions.validate().map(|()| params))
        {
            Ok(params) => params,
            Err(err) => {
                return ctx.respond_error(
                    topic,
                    request.id,
                    reason::INVALID_SESSION_UPGRADE,
                    err.to_string(),
                )
            }
        };
        let permissions = session.permissions.merged(&params.permissions);
        let stored = permissions.clone();
        ctx.sessions.update(topic, |session| {
            session.permissions = stored;
            Ok(())
        })?;
        ctx.respond_ok(topic, request.id)?;
        let topic = topic.to_string();
        ctx.events.emit_event(EngineEvent::SessionUpgraded { topic, permissions });
        Ok(())
    }

    pub(crate) fn on_update_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        if !self.acknowledged(record)? {
            return Ok(());
        }
        let params: SessionUpdateParams = record.request.parse_params()?;
        let accounts = params.state.accounts;
        let stored = accounts.clone();
        self.ctx.sessions.update(&record.topic, |session| {
            session.accounts = stored;
            Ok(())
        })?;
        let topic = record.topic.clone();
        self.ctx.events.emit_event(EngineEvent::SessionUpdated { topic, accounts });
        Ok(())
    }

    pub(crate) fn on_upgrade_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        if !self.acknowledged(record)? {
            return Ok(());
        }
        let params: SessionUpgradeParams = record.request.parse_params()?;
        let session = self.ctx.sessions.update(&record.topic, |session| {
            session.permissions = session.permissions.merged(&params.permissions);
            Ok(())
        })?;
        let topic = record.topic.clone();
        let permissions = session.permissions;
        self.ctx.events.emit_event(EngineEvent::SessionUpgraded { topic, permissions });
        Ok(())
    }

    /// Whether a state change of a live session was accepted by the peer.
    /// Refusals are reported as [`EngineEvent::RequestFailed`].
    fn acknowledged(&self, record: &JsonRpcRecord) -> Result<bool, EngineError> {
        let Some(response) = &record.response else {
            return Ok(false);
        };
        let method = &record.request.method;
        if let Some(error) = &response.error {
            log::warn!("{method} on {} refused: {}", record.topic, error.message);
            self.ctx.request_failed(record, error.clone());
            return Ok(false);
        }
        if self.lookup(&record.topic)?.is_none() {
            log::debug!("{method} acknowledged for gone session {}", record.topic);
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn on_delete(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        let params: DeleteParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return self.ctx.respond_invalid(topic, request.id, err),
        };
        self.ctx.respond_ok(topic, request.id)?;
        self.teardown(&session);
        log::info!("peer deleted session {topic}: {}", params.reason.message);
        let topic = topic.to_string();
        self.ctx.events.emit_event(EngineEvent::SessionDeleted { topic, reason: params.reason });
        Ok(())
    }

    pub(crate) fn on_ping(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        match self.lookup(topic)? {
            Some(session) if session.is_settled() => self.ctx.respond_ok(topic, request.id),
            Some(_) => self.respond_not_settled(topic, request.id, reason::UNAUTHORIZED_METHOD),
            None => self.respond_unknown(topic, request.id),
        }
    }

    pub(crate) fn on_notification(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        if !session.is_settled() {
            return self.respond_not_settled(topic, request.id, reason::UNAUTHORIZED_NOTIFICATION);
        }
        let params: SessionNotificationParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };
        if !session.permissions.allows_notification(&params.kind) {
            return ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_NOTIFICATION,
                ProtocolError::UnauthorizedNotification(params.kind).to_string(),
            );
        }
        ctx.respond_ok(topic, request.id)?;
        ctx.events.emit_event(EngineEvent::SessionNotification {
            topic: topic.to_string(),
            kind: params.kind,
            data: params.data,
        });
        Ok(())
    }

    /// Surfaces a permitted application request. The application answers it
    /// through [`SessionEngine::respond`].
    pub(crate) fn on_payload(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let Some(session) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        if !session.is_settled() {
            return self.respond_not_settled(topic, request.id, reason::UNAUTHORIZED_METHOD);
        }
        let params: SessionPayloadParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };
        if !session.permissions.allows_method(&params.request.method) {
            return ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_METHOD,
                ProtocolError::UnauthorizedMethod(params.request.method).to_string(),
            );
        }
        if let Some(chain_id) = &params.chain_id {
            if !session.permissions.allows_chain(chain_id) {
                return ctx.respond_error(
                    topic,
                    request.id,
                    reason::UNAUTHORIZED_METHOD,
                    format!("chain {chain_id} is not permitted"),
                );
            }
        }
        ctx.events.emit_event(EngineEvent::SessionPayload {
            topic: topic.to_string(),
            request_id: request.id,
            method: params.request.method,
            params: params.request.params,
            chain_id: params.chain_id,
        });
        Ok(())
    }

    /// Every answer to an application request, refusals included, surfaces as
    /// [`EngineEvent::SessionPayloadResponse`] carrying the request id.
    pub(crate) fn on_payload_response(&self, record: &JsonRpcRecord) {
        if let Some(response) = &record.response {
            self.ctx.events.emit_event(EngineEvent::SessionPayloadResponse {
                topic: record.topic.clone(),
                response: response.clone(),
            });
        }
    }

    fn legal(&self, operation: SessionOperation, topic: &str) -> Result<Session, EngineError> {
        let session = self.ctx.sessions.get_sequence(topic)?;
        ensure_operation_legal(operation, session.state, topic)?;
        Ok(session)
    }

    fn controlled(&self, operation: SessionOperation, topic: &str) -> Result<Session, EngineError> {
        let session = self.legal(operation, topic)?;
        if !session.is_controller {
            return Err(ProtocolError::NotController(topic.to_string()).into());
        }
        Ok(session)
    }

    /// A proposed ttl must be positive and no longer than a settled session
    /// may live here.
    fn check_ttl(&self, ttl: u64) -> Result<(), ProtocolError> {
        if ttl == 0 || ttl > self.ctx.config.session_ttl.settled {
            return Err(ProtocolError::InvalidTtl(ttl));
        }
        Ok(())
    }

    fn discard(&self, topic: &str, settled_topic: Option<&str>, public_key: &AgreementPublicKey) {
        let ctx = &self.ctx;
        for topic in std::iter::once(topic).chain(settled_topic) {
            if let Err(err) = ctx.sessions.delete(topic) {
                log::warn!("could not delete session {topic}: {err}");
            }
            ctx.release_topic(topic);
        }
        ctx.forget_key(public_key);
    }

    fn teardown(&self, session: &Session) {
        self.discard(&session.topic, session.settled_topic.as_deref(), &session.self_public_key);
    }

    fn lookup(&self, topic: &str) -> Result<Option<Session>, EngineError> {
        match self.ctx.sessions.get_sequence(topic) {
            Ok(session) => Ok(Some(session)),
            Err(EngineError::Protocol(ProtocolError::NoSequenceForTopic(_))) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn respond_unknown(&self, topic: &str, id: i64) -> Result<(), EngineError> {
        self.ctx.respond_error(
            topic,
            id,
            reason::NO_MATCHING_TOPIC,
            ProtocolError::NoSequenceForTopic(topic.to_string()).to_string(),
        )
    }

    fn respond_not_settled(&self, topic: &str, id: i64, code: i64) -> Result<(), EngineError> {
        self.ctx.respond_error(
            topic,
            id,
            code,
            ProtocolError::SessionNotSettled(topic.to_string()).to_string(),
        )
    }
}
