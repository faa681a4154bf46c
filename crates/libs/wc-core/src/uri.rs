//! Out-of-band pairing URI.
//!
//! `wc:<topic>@<version>?controller=<bool>&publicKey=<hex>&relay=<json>` with
//! the query encoded as `application/x-www-form-urlencoded`.

use crate::crypto::AgreementPublicKey;
use crate::error::ProtocolError;
use crate::types::RelayProtocolOptions;
use std::fmt;
use std::str::FromStr;
use url::{form_urlencoded, Url};

pub const URI_SCHEME: &str = "wc";

#[derive(Clone, Debug, PartialEq)]
pub struct WalletConnectUri {
    pub topic: String,
    pub version: String,
    pub public_key: AgreementPublicKey,
    pub is_controller: bool,
    pub relay: RelayProtocolOptions,
}

impl WalletConnectUri {
    pub fn new(
        topic: impl Into<String>,
        public_key: AgreementPublicKey,
        is_controller: bool,
        relay: RelayProtocolOptions,
    ) -> Self {
        Self {
            topic: topic.into(),
            version: crate::PROTOCOL_VERSION.to_string(),
            public_key,
            is_controller,
            relay,
        }
    }

    pub fn to_uri_string(&self) -> Result<String, ProtocolError> {
        let relay = serde_json::to_string(&self.relay)
            .map_err(|err| ProtocolError::InvalidUri(format!("relay options: {err}")))?;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("controller", if self.is_controller { "true" } else { "false" })
            .append_pair("publicKey", &self.public_key.to_hex())
            .append_pair("relay", &relay)
            .finish();
        Ok(format!("{URI_SCHEME}:{}@{}?{query}", self.topic, self.version))
    }

    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let url = Url::parse(value.trim())
            .map_err(|err| ProtocolError::InvalidUri(format!("{value}: {err}")))?;
        if url.scheme() != URI_SCHEME {
            return Err(ProtocolError::InvalidUri(format!("unexpected scheme {}", url.scheme())));
        }
        let (topic, version) = url
            .path()
            .split_once('@')
            .ok_or_else(|| ProtocolError::InvalidUri("missing @version".to_string()))?;

        let mut controller = None;
        let mut public_key = None;
        let mut relay = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "controller" => controller = Some(value.into_owned()),
                "publicKey" => public_key = Some(value.into_owned()),
                "relay" => relay = Some(value.into_owned()),
                _ => {}
            }
        }

        let is_controller = match controller.as_deref() {
            Some("true") => true,
            Some("false") => false,
            Some(other) => {
                return Err(ProtocolError::InvalidUri(format!("controller flag {other:?}")))
            }
            None => return Err(ProtocolError::InvalidUri("missing controller".to_string())),
        };
        let public_key = public_key
            .ok_or_else(|| ProtocolError::InvalidUri("missing publicKey".to_string()))
            .and_then(|hex| {
                AgreementPublicKey::from_hex(&hex)
                    .map_err(|err| ProtocolError::InvalidUri(err.to_string()))
            })?;
        let relay = relay
            .ok_or_else(|| ProtocolError::InvalidUri("missing relay".to_string()))
            .and_then(|json| {
                serde_json::from_str::<RelayProtocolOptions>(&json)
                    .map_err(|err| ProtocolError::InvalidUri(format!("relay options: {err}")))
            })?;

        let uri = Self {
            topic: topic.to_string(),
            version: version.to_string(),
            public_key,
            is_controller,
            relay,
        };
        uri.validate()?;
        Ok(uri)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.topic.is_empty() || !self.topic.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidUri(format!("topic {:?}", self.topic)));
        }
        if self.version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidUri(format!("unsupported version {}", self.version)));
        }
        if self.relay.protocol.is_empty() {
            return Err(ProtocolError::InvalidUri("empty relay protocol".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for WalletConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_uri_string().map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl FromStr for WalletConnectUri {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
