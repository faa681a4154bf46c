//! Pairing negotiation.
//!
//! The proposer stores a `Proposed` record on a random topic A and hands the
//! URI to the responder out of band. The responder derives the settled topic
//! B from the agreement secret, keeps `Responded` (A) and `PreSettled` (B)
//! records and publishes `wc_pairingApprove` on A. The proposer derives the
//! same B, stores it `Acknowledged` and answers; the answer moves the
//! responder's B to `Acknowledged` as well. A failed approval rolls back every
//! artifact the responder created.

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::events::EngineEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wc_core::jsonrpc::reason;
use wc_core::params::{
    DeleteParams, PairingApproveParams, PairingPayloadParams, Participant, PayloadRequest,
    PingParams,
};
use wc_core::{
    AgreementPublicKey, JsonRpcRecord, JsonRpcRequest, KeyAgreementService, Pairing,
    PairingPermissions, PairingState, ProtocolError, Reason, StorageError, WalletConnectUri,
    WcMethod,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum ApprovalStatus {
    InFlight,
    Completed { settled_topic: String },
}

/// Single-use guard over pairing URIs, keyed by proposal topic. Completed
/// entries live as long as the pairing they produced.
#[derive(Default)]
pub(crate) struct ApprovalClaims {
    approvals: Mutex<HashMap<String, ApprovalStatus>>,
}

impl ApprovalClaims {
    pub(crate) fn claim(&self, topic: &str) -> Result<(), ProtocolError> {
        let mut approvals = self.approvals.lock().expect("pairing approvals mutex poisoned");
        if approvals.contains_key(topic) {
            return Err(ProtocolError::PairingAlreadyApproving(topic.to_string()));
        }
        approvals.insert(topic.to_string(), ApprovalStatus::InFlight);
        Ok(())
    }

    /// Frees an in-flight claim so the URI can be retried.
    pub(crate) fn release(&self, topic: &str) {
        let mut approvals = self.approvals.lock().expect("pairing approvals mutex poisoned");
        if approvals.get(topic) == Some(&ApprovalStatus::InFlight) {
            approvals.remove(topic);
        }
    }

    pub(crate) fn complete(&self, topic: &str, settled_topic: &str) {
        let status = ApprovalStatus::Completed { settled_topic: settled_topic.to_string() };
        self.approvals
            .lock()
            .expect("pairing approvals mutex poisoned")
            .insert(topic.to_string(), status);
    }

    /// Drops every entry for a pairing that is gone, whether `topic` is the
    /// proposal topic or the settled topic.
    pub(crate) fn forget(&self, topic: &str) {
        let mut approvals = self.approvals.lock().expect("pairing approvals mutex poisoned");
        approvals.retain(|proposal_topic, status| match status {
            _ if proposal_topic.as_str() == topic => false,
            ApprovalStatus::Completed { settled_topic } => settled_topic.as_str() != topic,
            ApprovalStatus::InFlight => true,
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.approvals.lock().expect("pairing approvals mutex poisoned").len()
    }
}

/// Everything a responder-side approval created so far.
struct ApprovalAttempt {
    proposal_topic: String,
    settled_topic: Option<String>,
    self_public_key: Option<AgreementPublicKey>,
}

pub struct PairingEngine {
    ctx: Arc<EngineContext>,
}

impl PairingEngine {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn propose(
        &self,
        permissions: PairingPermissions,
    ) -> Result<WalletConnectUri, EngineError> {
        permissions.validate()?;
        let ctx = &self.ctx;
        let public_key = ctx.crypto.generate_key_pair()?;
        let topic = KeyAgreementService::random_topic();
        let pairing = Pairing {
            topic: topic.clone(),
            expiry: ctx.now() + ctx.config.pairing_ttl.proposed,
            state: PairingState::Proposed,
            self_public_key: public_key,
            peer_public_key: None,
            relay: ctx.config.relay.clone(),
            is_controller: ctx.config.controller,
            permissions,
            peer_metadata: None,
            settled_topic: None,
        };

        if let Err(err) = ctx.subscriber.set_subscription(&topic) {
            ctx.forget_key(&public_key);
            return Err(err.into());
        }
        if let Err(err) = ctx.pairings.set_sequence(pairing) {
            ctx.release_topic(&topic);
            ctx.forget_key(&public_key);
            return Err(err.into());
        }
        log::info!("proposed pairing on {topic}");
        let relay = ctx.config.relay.clone();
        Ok(WalletConnectUri::new(topic, public_key, ctx.config.controller, relay))
    }

    /// Responds to a pairing URI. Each URI can be approved once; a second call
    /// fails before any state or network effect.
    pub fn approve(&self, uri: &WalletConnectUri) -> Result<Pairing, EngineError> {
        uri.validate()?;
        self.ctx.approvals.claim(&uri.topic)?;

        let mut attempt = ApprovalAttempt {
            proposal_topic: uri.topic.clone(),
            settled_topic: None,
            self_public_key: None,
        };
        match self.try_approve(uri, &mut attempt) {
            Ok(pairing) => Ok(pairing),
            Err(err) => {
                log::warn!("approving pairing {} failed: {err}", uri.topic);
                self.discard_attempt(&attempt);
                self.ctx.approvals.release(&uri.topic);
                Err(err)
            }
        }
    }

    fn try_approve(
        &self,
        uri: &WalletConnectUri,
        attempt: &mut ApprovalAttempt,
    ) -> Result<Pairing, EngineError> {
        let ctx = &self.ctx;
        let self_public_key = ctx.crypto.generate_key_pair()?;
        attempt.self_public_key = Some(self_public_key);
        let (settled_topic, _) =
            ctx.crypto.create_agreement(&self_public_key, &uri.public_key.to_hex())?;
        attempt.settled_topic = Some(settled_topic.clone());

        let now = ctx.now();
        let is_controller = !uri.is_controller;
        let responded = Pairing {
            topic: uri.topic.clone(),
            expiry: now + ctx.config.pairing_ttl.pending,
            state: PairingState::Responded,
            self_public_key,
            peer_public_key: Some(uri.public_key),
            relay: uri.relay.clone(),
            is_controller,
            permissions: PairingPermissions::default(),
            peer_metadata: None,
            settled_topic: Some(settled_topic.clone()),
        };
        let pre_settled = Pairing {
            topic: settled_topic.clone(),
            state: PairingState::PreSettled,
            settled_topic: None,
            ..responded.clone()
        };
        ctx.pairings.set_sequence(responded)?;
        ctx.pairings.set_sequence(pre_settled.clone())?;
        ctx.subscriber.set_subscription(&uri.topic)?;
        ctx.subscriber.set_subscription(&settled_topic)?;

        let params = PairingApproveParams {
            relay: uri.relay.clone(),
            responder: Participant {
                public_key: self_public_key,
                metadata: ctx.config.metadata.clone(),
            },
            expiry: now + ctx.config.pairing_ttl.settled,
        };
        let request = JsonRpcRequest::new(WcMethod::PairingApprove, &params)?;
        ctx.relay.request(&uri.topic, &request)?;
        log::info!("approved pairing {} as {settled_topic}", uri.topic);
        Ok(pre_settled)
    }

    pub fn ping(&self, topic: &str) -> Result<i64, EngineError> {
        let pairing = self.settled(topic)?;
        let request = JsonRpcRequest::new(WcMethod::PairingPing, &PingParams::default())?;
        self.ctx.relay.request(&pairing.topic, &request)?;
        Ok(request.id)
    }

    /// Tears the pairing down locally and tells the peer when the topic is
    /// settled. Local teardown happens even if the notification fails.
    pub fn delete(&self, topic: &str, reason: Reason) -> Result<(), EngineError> {
        let pairing = self.ctx.pairings.get_sequence(topic)?;
        let notified = if pairing.state.is_settled() {
            JsonRpcRequest::new(WcMethod::PairingDelete, &DeleteParams { reason: reason.clone() })
                .map_err(EngineError::from)
                .and_then(|request| self.ctx.relay.request(topic, &request))
        } else {
            Ok(())
        };
        self.teardown(&pairing);
        let topic = topic.to_string();
        self.ctx.events.emit_event(EngineEvent::PairingDeleted { topic, reason });
        notified
    }

    pub fn get_pairing(&self, topic: &str) -> Result<Pairing, EngineError> {
        self.ctx.pairings.get_sequence(topic)
    }

    pub fn get_pairings(&self) -> Result<Vec<Pairing>, StorageError> {
        self.ctx.pairings.get_all()
    }

    pub fn get_settled_pairings(&self) -> Result<Vec<Pairing>, StorageError> {
        Ok(self.get_pairings()?.into_iter().filter(|pairing| pairing.state.is_settled()).collect())
    }

    pub(crate) fn on_approve_request(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let params: PairingApproveParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };
        let proposal = match self.lookup(topic)? {
            Some(pairing) if pairing.state == PairingState::Proposed => pairing,
            Some(pairing) => {
                return ctx.respond_error(
                    topic,
                    request.id,
                    reason::INVALID_REQUEST,
                    format!("pairing {topic} is {}", pairing.state.as_str()),
                )
            }
            None => return self.respond_unknown(topic, request.id),
        };
        if params.expiry <= ctx.now() {
            return ctx.respond_error(
                topic,
                request.id,
                reason::INVALID_REQUEST,
                "pairing expiry is in the past",
            );
        }
        let settled_topic = match ctx
            .crypto
            .create_agreement(&proposal.self_public_key, &params.responder.public_key.to_hex())
        {
            Ok((settled_topic, _)) => settled_topic,
            Err(err) => return ctx.respond_invalid(topic, request.id, err),
        };

        ctx.subscriber.set_subscription(&settled_topic)?;
        let pairing = Pairing {
            topic: settled_topic.clone(),
            expiry: params.expiry,
            state: PairingState::Acknowledged,
            self_public_key: proposal.self_public_key,
            peer_public_key: Some(params.responder.public_key),
            relay: params.relay,
            is_controller: proposal.is_controller,
            permissions: proposal.permissions,
            peer_metadata: params.responder.metadata,
            settled_topic: None,
        };
        ctx.pairings.set_sequence(pairing.clone())?;
        ctx.pairings.delete(topic)?;
        ctx.respond_ok(topic, request.id)?;
        ctx.release_topic(topic);
        log::info!("pairing {topic} settled as {settled_topic}");
        ctx.events.emit_event(EngineEvent::PairingApproved { pairing });
        Ok(())
    }

    pub(crate) fn on_approve_response(&self, record: &JsonRpcRecord) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let proposal_topic = record.topic.as_str();
        let Some(response) = &record.response else {
            return Ok(());
        };
        let Some(proposal) = self.lookup(proposal_topic)? else {
            log::warn!("approval answer for unknown pairing {proposal_topic}");
            return Ok(());
        };
        let attempt = ApprovalAttempt {
            proposal_topic: proposal_topic.to_string(),
            settled_topic: proposal.settled_topic.clone(),
            self_public_key: Some(proposal.self_public_key),
        };

        if let Some(error) = &response.error {
            log::warn!("pairing {proposal_topic} rejected by peer: {}", error.message);
            self.discard_attempt(&attempt);
            ctx.approvals.release(proposal_topic);
            ctx.events.emit_event(EngineEvent::PairingApprovalFailed {
                topic: proposal_topic.to_string(),
                reason: error.message.clone(),
            });
            return Ok(());
        }

        let settled_topic = proposal
            .settled_topic
            .ok_or_else(|| ProtocolError::NoSequenceForTopic(format!("{proposal_topic}/settled")))?;
        let params: PairingApproveParams = record.request.parse_params()?;
        let pairing = ctx.pairings.update(&settled_topic, |pairing| {
            pairing.advance(PairingState::Acknowledged)?;
            pairing.expiry = params.expiry;
            Ok(())
        })?;
        ctx.pairings.delete(proposal_topic)?;
        ctx.release_topic(proposal_topic);
        ctx.approvals.complete(proposal_topic, &settled_topic);
        log::info!("pairing {settled_topic} acknowledged");
        ctx.events.emit_event(EngineEvent::PairingAcknowledged { pairing });
        Ok(())
    }

    /// Unwraps a request tunnelled through a settled pairing. Requests that
    /// cannot be delivered are answered here and yield `None`.
    pub(crate) fn on_payload(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<Option<PayloadRequest>, EngineError> {
        let ctx = &self.ctx;
        let Some(pairing) = self.lookup(topic)? else {
            self.respond_unknown(topic, request.id)?;
            return Ok(None);
        };
        if !pairing.state.is_settled() {
            ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_METHOD,
                ProtocolError::PairingNotSettled(topic.to_string()).to_string(),
            )?;
            return Ok(None);
        }
        let params: PairingPayloadParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => {
                ctx.respond_invalid(topic, request.id, err)?;
                return Ok(None);
            }
        };
        if !pairing.permissions.allows(&params.request.method) {
            ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_METHOD,
                ProtocolError::UnauthorizedMethod(params.request.method).to_string(),
            )?;
            return Ok(None);
        }
        Ok(Some(params.request))
    }

    pub(crate) fn on_ping(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        match self.lookup(topic)? {
            Some(pairing) if pairing.state.is_settled() => self.ctx.respond_ok(topic, request.id),
            Some(_) => self.ctx.respond_error(
                topic,
                request.id,
                reason::UNAUTHORIZED_METHOD,
                ProtocolError::PairingNotSettled(topic.to_string()).to_string(),
            ),
            None => self.respond_unknown(topic, request.id),
        }
    }

    pub(crate) fn on_delete(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
    ) -> Result<(), EngineError> {
        let Some(pairing) = self.lookup(topic)? else {
            return self.respond_unknown(topic, request.id);
        };
        let params: DeleteParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return self.ctx.respond_invalid(topic, request.id, err),
        };
        self.ctx.respond_ok(topic, request.id)?;
        self.teardown(&pairing);
        log::info!("peer deleted pairing {topic}: {}", params.reason.message);
        self.ctx.events.emit_event(EngineEvent::PairingDeleted {
            topic: topic.to_string(),
            reason: params.reason,
        });
        Ok(())
    }

    fn discard_attempt(&self, attempt: &ApprovalAttempt) {
        let ctx = &self.ctx;
        if let Err(err) = ctx.pairings.delete(&attempt.proposal_topic) {
            log::warn!("could not delete pairing {}: {err}", attempt.proposal_topic);
        }
        ctx.release_topic(&attempt.proposal_topic);
        if let Some(settled_topic) = &attempt.settled_topic {
            if let Err(err) = ctx.pairings.delete(settled_topic) {
                log::warn!("could not delete pairing {settled_topic}: {err}");
            }
            ctx.release_topic(settled_topic);
        }
        if let Some(public_key) = &attempt.self_public_key {
            ctx.forget_key(public_key);
        }
    }

    fn teardown(&self, pairing: &Pairing) {
        self.ctx.approvals.forget(&pairing.topic);
        self.discard_attempt(&ApprovalAttempt {
            proposal_topic: pairing.topic.clone(),
            settled_topic: pairing.settled_topic.clone(),
            self_public_key: Some(pairing.self_public_key),
        });
    }

    fn settled(&self, topic: &str) -> Result<Pairing, EngineError> {
        let pairing = self.ctx.pairings.get_sequence(topic)?;
        if !pairing.state.is_settled() {
            return Err(ProtocolError::PairingNotSettled(topic.to_string()).into());
        }
        Ok(pairing)
    }

    fn lookup(&self, topic: &str) -> Result<Option<Pairing>, EngineError> {
        match self.ctx.pairings.get_sequence(topic) {
            Ok(pairing) => Ok(Some(pairing)),
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
}
