//! JSON-RPC 2.0 framing for relay traffic.

use crate::error::ProtocolError;
use crate::time::now_epoch_millis;
use rand_core::{OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const JSONRPC_VERSION: &str = "2.0";

/// Stable error codes carried in JSON-RPC error responses.
pub mod reason {
    pub const INVALID_REQUEST: i64 = 1001;
    pub const INVALID_SESSION_PROPOSE: i64 = 1002;
    pub const INVALID_SESSION_UPDATE: i64 = 1003;
    pub const INVALID_SESSION_UPGRADE: i64 = 1004;
    pub const NO_MATCHING_TOPIC: i64 = 1301;
    pub const UNAUTHORIZED_METHOD: i64 = 3001;
    pub const UNAUTHORIZED_NOTIFICATION: i64 = 3002;
    pub const UNAUTHORIZED_UPDATE: i64 = 3003;
    pub const UNAUTHORIZED_UPGRADE: i64 = 3004;
    pub const UNAUTHORIZED_MATCHING_CONTROLLER: i64 = 3005;
    pub const USER_REJECTED: i64 = 5000;
    pub const USER_DISCONNECTED: i64 = 6000;
    pub const TRANSPORT_FAILURE: i64 = -32000;
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WcMethod {
    PairingApprove,
    PairingPayload,
    PairingPing,
    PairingDelete,
    SessionPropose,
    SessionApprove,
    SessionReject,
    SessionUpdate,
    SessionUpgrade,
    SessionDelete,
    SessionPayload,
    SessionPing,
    SessionNotification,
}

impl WcMethod {
    pub const ALL: [WcMethod; 13] = [
        WcMethod::PairingApprove,
        WcMethod::PairingPayload,
        WcMethod::PairingPing,
        WcMethod::PairingDelete,
        WcMethod::SessionPropose,
        WcMethod::SessionApprove,
        WcMethod::SessionReject,
        WcMethod::SessionUpdate,
        WcMethod::SessionUpgrade,
        WcMethod::SessionDelete,
        WcMethod::SessionPayload,
        WcMethod::SessionPing,
        WcMethod::SessionNotification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WcMethod::PairingApprove => "wc_pairingApprove",
            WcMethod::PairingPayload => "wc_pairingPayload",
            WcMethod::PairingPing => "wc_pairingPing",
            WcMethod::PairingDelete => "wc_pairingDelete",
            WcMethod::SessionPropose => "wc_sessionPropose",
            WcMethod::SessionApprove => "wc_sessionApprove",
            WcMethod::SessionReject => "wc_sessionReject",
            WcMethod::SessionUpdate => "wc_sessionUpdate",
            WcMethod::SessionUpgrade => "wc_sessionUpgrade",
            WcMethod::SessionDelete => "wc_sessionDelete",
            WcMethod::SessionPayload => "wc_sessionPayload",
            WcMethod::SessionPing => "wc_sessionPing",
            WcMethod::SessionNotification => "wc_sessionNotification",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == value)
    }

    /// Only application payloads ask the relay to wake the receiving wallet.
    pub fn requires_prompt(self) -> bool {
        matches!(self, WcMethod::SessionPayload)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub id: i64,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: JsonValue,
}

impl JsonRpcRequest {
    pub fn new<P: Serialize>(method: WcMethod, params: &P) -> Result<Self, ProtocolError> {
        let params = serde_json::to_value(params)
            .map_err(|err| ProtocolError::MalformedPayload(err.to_string()))?;
        Ok(Self::with_id(next_request_id(), method.as_str(), params))
    }

    pub fn with_id(id: i64, method: impl Into<String>, params: JsonValue) -> Self {
        Self { id, jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params }
    }

    pub fn wc_method(&self) -> Option<WcMethod> {
        WcMethod::parse(&self.method)
    }

    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.params.clone())
            .map_err(|err| ProtocolError::MalformedPayload(format!("{}: {err}", self.method)))
    }

    pub fn requires_prompt(&self) -> bool {
        self.wc_method().is_some_and(WcMethod::requires_prompt)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub id: i64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: i64, result: JsonValue) -> Self {
        Self { id, jsonrpc: JSONRPC_VERSION.to_string(), result: Some(result), error: None }
    }

    pub fn failure(id: i64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: JsonValue = serde_json::from_slice(bytes)
            .map_err(|err| ProtocolError::MalformedPayload(err.to_string()))?;
        let is_request = value.get("method").is_some();
        let parsed = if is_request {
            serde_json::from_value(value).map(JsonRpcMessage::Request)
        } else {
            serde_json::from_value(value).map(JsonRpcMessage::Response)
        };
        parsed.map_err(|err| ProtocolError::MalformedPayload(err.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        let encoded = match self {
            JsonRpcMessage::Request(request) => serde_json::to_vec(request),
            JsonRpcMessage::Response(response) => serde_json::to_vec(response),
        };
        encoded.map_err(|err| ProtocolError::MalformedPayload(err.to_string()))
    }

    pub fn id(&self) -> i64 {
        match self {
            JsonRpcMessage::Request(request) => request.id,
            JsonRpcMessage::Response(response) => response.id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRecord {
    pub id: i64,
    pub topic: String,
    pub request: JsonRpcRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonRpcResponse>,
}

/// Millisecond timestamp with three random trailing digits.
pub fn next_request_id() -> i64 {
    let suffix = i64::from(OsRng.next_u32() % 1000);
    (now_epoch_millis() as i64).saturating_mul(1000).saturating_add(suffix)
}
