//! Expirable, topic-keyed pairing and session records.

use crate::crypto::AgreementPublicKey;
use crate::error::ProtocolError;
use crate::params::SessionProposal;
use crate::types::{AppMetadata, PairingPermissions, RelayProtocolOptions, SessionPermissions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub trait ExpirableSequence: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name used in logs and expiration events.
    const KIND: &'static str;

    fn topic(&self) -> &str;

    fn expiry(&self) -> u64;

    fn is_expired(&self, now_secs: u64) -> bool {
        now_secs >= self.expiry()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    Proposed,
    Responded,
    PreSettled,
    Settled,
    Acknowledged,
}

impl PairingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Responded => "responded",
            Self::PreSettled => "pre_settled",
            Self::Settled => "settled",
            Self::Acknowledged => "acknowledged",
        }
    }

    pub fn advance(self, next: PairingState) -> Result<PairingState, ProtocolError> {
        if next <= self {
            return Err(ProtocolError::InvalidStateTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        Ok(next)
    }

    /// Settled and acknowledged pairings can carry session proposals.
    pub fn is_settled(self) -> bool {
        self >= PairingState::Settled
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Proposed,
    Responded,
    PreSettled,
    Settled,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Responded => "responded",
            Self::PreSettled => "pre_settled",
            Self::Settled => "settled",
        }
    }

    pub fn advance(self, next: SessionState) -> Result<SessionState, ProtocolError> {
        if next <= self {
            return Err(ProtocolError::InvalidStateTransition {
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        Ok(next)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Pairing {
    pub topic: String,
    pub expiry: u64,
    pub state: PairingState,
    pub self_public_key: AgreementPublicKey,
    #[serde(default)]
    pub peer_public_key: Option<AgreementPublicKey>,
    pub relay: RelayProtocolOptions,
    pub is_controller: bool,
    pub permissions: PairingPermissions,
    #[serde(default)]
    pub peer_metadata: Option<AppMetadata>,
    /// Settled topic derived for a `Responded` proposal record.
    #[serde(default)]
    pub settled_topic: Option<String>,
}

impl Pairing {
    pub fn advance(&mut self, next: PairingState) -> Result<(), ProtocolError> {
        self.state = self.state.advance(next)?;
        Ok(())
    }
}

impl ExpirableSequence for Pairing {
    const KIND: &'static str = "pairing";

    fn topic(&self) -> &str {
        &self.topic
    }

    fn expiry(&self) -> u64 {
        self.expiry
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub topic: String,
    pub expiry: u64,
    pub state: SessionState,
    pub self_public_key: AgreementPublicKey,
    #[serde(default)]
    pub peer_public_key: Option<AgreementPublicKey>,
    pub relay: RelayProtocolOptions,
    pub is_controller: bool,
    pub permissions: SessionPermissions,
    #[serde(default)]
    pub accounts: Vec<String>,
    pub pairing_topic: String,
    #[serde(default)]
    pub peer_metadata: Option<AppMetadata>,
    #[serde(default)]
    pub proposal: Option<SessionProposal>,
    #[serde(default)]
    pub settled_topic: Option<String>,
}

impl Session {
    pub fn advance(&mut self, next: SessionState) -> Result<(), ProtocolError> {
        self.state = self.state.advance(next)?;
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        self.state == SessionState::Settled
    }
}

impl ExpirableSequence for Session {
    const KIND: &'static str = "session";

    fn topic(&self) -> &str {
        &self.topic
    }

    fn expiry(&self) -> u64 {
        self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_states_only_move_forward() {
        assert_eq!(
            PairingState::Proposed.advance(PairingState::Responded),
            Ok(PairingState::Responded)
        );
        assert_eq!(
            PairingState::PreSettled.advance(PairingState::Acknowledged),
            Ok(PairingState::Acknowledged)
        );
        let err = PairingState::Settled.advance(PairingState::Proposed).expect_err("backwards");
        assert_eq!(
            err,
            ProtocolError::InvalidStateTransition { from: "settled", to: "proposed" }
        );
        assert!(PairingState::Settled.advance(PairingState::Settled).is_err());
    }

    #[test]
    fn session_states_only_move_forward() {
        assert!(SessionState::PreSettled.advance(SessionState::Settled).is_ok());
        assert!(SessionState::Settled.advance(SessionState::PreSettled).is_err());
    }

    #[test]
    fn acknowledged_counts_as_settled() {
        assert!(PairingState::Acknowledged.is_settled());
        assert!(PairingState::Settled.is_settled());
        assert!(!PairingState::PreSettled.is_settled());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let pairing = Pairing {
            topic: "t".to_string(),
            expiry: 100,
            state: PairingState::Proposed,
            self_public_key: AgreementPublicKey::from_bytes(&[9u8; 32]).expect("key"),
            peer_public_key: None,
            relay: RelayProtocolOptions::default(),
            is_controller: false,
            permissions: PairingPermissions::default(),
            peer_metadata: None,
            settled_topic: None,
        };
        assert!(!pairing.is_expired(99));
        assert!(pairing.is_expired(100));
    }
}
