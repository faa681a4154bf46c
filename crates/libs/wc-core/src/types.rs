use crate::caip::is_valid_chain_id;
use crate::error::ProtocolError;
use crate::jsonrpc::WcMethod;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayProtocolOptions {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl RelayProtocolOptions {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self { protocol: protocol.into(), params: None }
    }
}

impl Default for RelayProtocolOptions {
    fn default() -> Self {
        Self::new(crate::DEFAULT_RELAY_PROTOCOL)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// JSON-RPC methods a pairing is allowed to carry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairingPermissions {
    pub methods: Vec<String>,
}

impl Default for PairingPermissions {
    fn default() -> Self {
        Self { methods: vec![WcMethod::SessionPropose.as_str().to_string()] }
    }
}

impl PairingPermissions {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(bad) = self.methods.iter().find(|method| method.trim().is_empty()) {
            return Err(ProtocolError::InvalidPermissions(format!("empty method name {bad:?}")));
        }
        Ok(())
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|allowed| allowed == method)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPermissions {
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
}

impl SessionPermissions {
    /// Every entry must be well formed on its own; a single bad one fails the set.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(bad) = self.chains.iter().find(|chain| !is_valid_chain_id(chain)) {
            return Err(ProtocolError::InvalidPermissions(format!("invalid chain id {bad:?}")));
        }
        if let Some(bad) = self.methods.iter().find(|method| method.trim().is_empty()) {
            return Err(ProtocolError::InvalidPermissions(format!("invalid method {bad:?}")));
        }
        if let Some(bad) = self.notifications.iter().find(|kind| kind.trim().is_empty()) {
            return Err(ProtocolError::InvalidPermissions(format!(
                "invalid notification type {bad:?}"
            )));
        }
        Ok(())
    }

    pub fn merged(&self, extra: &SessionPermissions) -> SessionPermissions {
        fn union(base: &[String], extra: &[String]) -> Vec<String> {
            let mut out = base.to_vec();
            for value in extra {
                if !out.contains(value) {
                    out.push(value.clone());
                }
            }
            out
        }
        SessionPermissions {
            chains: union(&self.chains, &extra.chains),
            methods: union(&self.methods, &extra.methods),
            notifications: union(&self.notifications, &extra.notifications),
        }
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|allowed| allowed == method)
    }

    pub fn allows_chain(&self, chain_id: &str) -> bool {
        self.chains.iter().any(|allowed| allowed == chain_id)
    }

    pub fn allows_notification(&self, kind: &str) -> bool {
        self.notifications.iter().any(|allowed| allowed == kind)
    }
}
