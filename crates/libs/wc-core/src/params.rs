//! Parameter bodies of the `wc_*` JSON-RPC methods.

use crate::crypto::AgreementPublicKey;
use crate::types::{AppMetadata, Reason, RelayProtocolOptions, SessionPermissions};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: AgreementPublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PairingApproveParams {
    pub relay: RelayProtocolOptions,
    pub responder: Participant,
    pub expiry: u64,
}

/// A request tunnelled through a settled pairing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PairingPayloadParams {
    pub request: PayloadRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PayloadRequest {
    pub method: String,
    #[serde(default)]
    pub params: JsonValue,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    pub public_key: AgreementPublicKey,
    pub controller: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AppMetadata>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProposalSignal {
    pub method: String,
    pub params: SignalParams,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    pub topic: String,
}

impl ProposalSignal {
    pub fn pairing(topic: impl Into<String>) -> Self {
        Self { method: "pairing".to_string(), params: SignalParams { topic: topic.into() } }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionProposal {
    pub topic: String,
    pub relay: RelayProtocolOptions,
    pub proposer: Proposer,
    pub signal: ProposalSignal,
    pub permissions: SessionPermissions,
    pub ttl: u64,
}

impl SessionProposal {
    pub fn pairing_topic(&self) -> &str {
        &self.signal.params.topic
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStateParams {
    pub accounts: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionApproveParams {
    pub relay: RelayProtocolOptions,
    pub responder: Participant,
    pub expiry: u64,
    pub state: SessionStateParams,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRejectParams {
    pub reason: Reason,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUpdateParams {
    pub state: SessionStateParams,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUpgradeParams {
    pub permissions: SessionPermissions,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteParams {
    pub reason: Reason,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayloadParams {
    pub request: PayloadRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionNotificationParams {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingParams {}
