//! Outbound encoding and inbound decoding of JSON-RPC traffic.
//!
//! A topic with a stored agreement secret carries encrypted messages; every
//! other topic carries the hex bootstrap encoding.

use crate::error::EngineError;
use crate::history::JsonRpcHistory;
use crate::subscriber::SubscriptionPayload;
use crate::transport::Transport;
use std::sync::Arc;
use wc_core::codec;
use wc_core::jsonrpc::reason;
use wc_core::{
    JsonRpcMessage, JsonRpcRecord, JsonRpcRequest, JsonRpcResponse, KeyAgreementService,
    ProtocolError,
};

#[derive(Clone, Debug, PartialEq)]
pub enum RelayEvent {
    Request { topic: String, request: JsonRpcRequest },
    Response { topic: String, record: JsonRpcRecord },
}

pub struct Relay {
    transport: Arc<dyn Transport>,
    crypto: Arc<KeyAgreementService>,
    history: Arc<JsonRpcHistory>,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn Transport>,
        crypto: Arc<KeyAgreementService>,
        history: Arc<JsonRpcHistory>,
    ) -> Self {
        Self { transport, crypto, history }
    }

    /// Records and publishes `request`. A publish failure resolves the record
    /// with a transport error so its completion is still delivered once.
    pub fn request(&self, topic: &str, request: &JsonRpcRequest) -> Result<(), EngineError> {
        let message = self.encode(topic, &JsonRpcMessage::Request(request.clone()))?;
        self.history.set(topic, request)?;
        if let Err(err) = self.transport.publish(topic, &message, request.requires_prompt()) {
            log::warn!("publishing {} on {topic} failed: {err}", request.method);
            let failure =
                JsonRpcResponse::failure(request.id, reason::TRANSPORT_FAILURE, err.to_string());
            if let Err(resolve_err) = self.history.resolve(&failure) {
                log::warn!("could not resolve failed request {}: {resolve_err}", request.id);
            }
            return Err(err.into());
        }
        log::debug!("published {} id={} on {topic}", request.method, request.id);
        Ok(())
    }

    pub fn respond(&self, topic: &str, response: &JsonRpcResponse) -> Result<(), EngineError> {
        let message = self.encode(topic, &JsonRpcMessage::Response(response.clone()))?;
        self.history.resolve(response)?;
        self.transport.publish(topic, &message, false)?;
        log::debug!("responded id={} on {topic}", response.id);
        Ok(())
    }

    /// Decodes an inbound payload. Duplicate requests yield `None`; duplicate
    /// responses fail with [`ProtocolError::ResponseDuplicate`].
    pub fn handle_payload(
        &self,
        payload: &SubscriptionPayload,
    ) -> Result<Option<RelayEvent>, EngineError> {
        let bytes = self.decode(&payload.topic, &payload.message)?;
        match JsonRpcMessage::from_slice(&bytes)? {
            JsonRpcMessage::Request(request) => match self.history.set(&payload.topic, &request) {
                Ok(()) => Ok(Some(RelayEvent::Request { topic: payload.topic.clone(), request })),
                Err(EngineError::Protocol(ProtocolError::RequestDuplicate(id))) => {
                    log::debug!("dropping duplicate request {id} on {}", payload.topic);
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            JsonRpcMessage::Response(response) => {
                let record = self.history.resolve(&response)?;
                if record.topic != payload.topic {
                    log::warn!(
                        "response {} arrived on {} but was requested on {}",
                        response.id,
                        payload.topic,
                        record.topic
                    );
                }
                Ok(Some(RelayEvent::Response { topic: payload.topic.clone(), record }))
            }
        }
    }

    fn encode(&self, topic: &str, message: &JsonRpcMessage) -> Result<String, EngineError> {
        let bytes = message.to_vec()?;
        match self.crypto.get_agreement(topic)? {
            Some(secret) => Ok(codec::encrypt(&secret, &bytes)?),
            None => Ok(codec::encode_plaintext(&bytes)),
        }
    }

    fn decode(&self, topic: &str, message: &str) -> Result<Vec<u8>, EngineError> {
        match self.crypto.get_agreement(topic)? {
            Some(secret) => Ok(codec::decrypt(&secret, message)?),
            None => Ok(codec::decode_plaintext(message)?),
        }
    }
}
