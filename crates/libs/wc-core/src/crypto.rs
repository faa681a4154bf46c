//! X25519 key agreement and topic derivation.
//!
//! Private keys and agreement secrets never leave this service except as
//! inputs to the codec. Both are persisted through [`KeyValueStorage`] so a
//! restarted client can keep talking on settled topics.

use crate::error::CryptoError;
use crate::storage::KeyValueStorage;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LENGTH: usize = 32;

const PRIVATE_KEY_PREFIX: &str = "wc.crypto.private.";
const AGREEMENT_PREFIX: &str = "wc.crypto.agreement.";

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgreementPublicKey([u8; KEY_LENGTH]);

impl AgreementPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPeerKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(value.trim())
            .map_err(|err| CryptoError::InvalidPeerKey(format!("not hex: {err}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementPublicKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AgreementPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AgreementPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AgreementPrivateKey([u8; KEY_LENGTH]);

impl AgreementPrivateKey {
    fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; KEY_LENGTH] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn public_key(&self) -> AgreementPublicKey {
        let secret = StaticSecret::from(self.0);
        AgreementPublicKey(PublicKey::from(&secret).to_bytes())
    }
}

impl fmt::Debug for AgreementPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AgreementPrivateKey(..)")
    }
}

/// ECDH output shared by both peers of a topic.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AgreementSecret([u8; KEY_LENGTH]);

impl AgreementSecret {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; KEY_LENGTH] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for AgreementSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AgreementSecret(..)")
    }
}

pub struct KeyAgreementService {
    storage: Arc<dyn KeyValueStorage>,
}

impl KeyAgreementService {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Creates a fresh key pair, keeps the private half and hands out the public one.
    pub fn generate_key_pair(&self) -> Result<AgreementPublicKey, CryptoError> {
        let private_key = AgreementPrivateKey::generate();
        let public_key = private_key.public_key();
        self.storage.set(&private_key_entry(&public_key), &private_key.0)?;
        Ok(public_key)
    }

    pub fn agreement(
        private_key: &AgreementPrivateKey,
        peer_public_key: &str,
    ) -> Result<AgreementSecret, CryptoError> {
        let peer = AgreementPublicKey::from_hex(peer_public_key)?;
        let secret = StaticSecret::from(private_key.0);
        let shared = secret.diffie_hellman(&PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPeerKey("low-order point".to_string()));
        }
        Ok(AgreementSecret(shared.to_bytes()))
    }

    pub fn derive_topic(secret: &AgreementSecret) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }

    pub fn random_topic() -> String {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Runs ECDH against `peer_public_key` with the stored private half of
    /// `self_public_key`, then remembers the secret under the derived topic.
    pub fn create_agreement(
        &self,
        self_public_key: &AgreementPublicKey,
        peer_public_key: &str,
    ) -> Result<(String, AgreementSecret), CryptoError> {
        let private_key = self
            .get_private_key(self_public_key)?
            .ok_or_else(|| CryptoError::MissingPrivateKey(self_public_key.to_hex()))?;
        let secret = Self::agreement(&private_key, peer_public_key)?;
        let topic = Self::derive_topic(&secret);
        self.set_agreement(&topic, &secret)?;
        Ok((topic, secret))
    }

    pub fn set_agreement(&self, topic: &str, secret: &AgreementSecret) -> Result<(), CryptoError> {
        self.storage.set(&agreement_entry(topic), secret.as_bytes())?;
        Ok(())
    }

    pub fn get_agreement(&self, topic: &str) -> Result<Option<AgreementSecret>, CryptoError> {
        let Some(mut bytes) = self.storage.get(&agreement_entry(topic))? else {
            return Ok(None);
        };
        let secret = AgreementSecret::from_bytes(&bytes);
        bytes.zeroize();
        secret.map(Some).ok_or_else(|| CryptoError::MissingAgreement(topic.to_string()))
    }

    pub fn delete_agreement(&self, topic: &str) -> Result<(), CryptoError> {
        self.storage.delete(&agreement_entry(topic))?;
        Ok(())
    }

    pub fn get_private_key(
        &self,
        public_key: &AgreementPublicKey,
    ) -> Result<Option<AgreementPrivateKey>, CryptoError> {
        let Some(mut bytes) = self.storage.get(&private_key_entry(public_key))? else {
            return Ok(None);
        };
        let key = AgreementPrivateKey::from_bytes(&bytes);
        bytes.zeroize();
        key.map(Some).ok_or_else(|| CryptoError::MissingPrivateKey(public_key.to_hex()))
    }

    pub fn delete_private_key(&self, public_key: &AgreementPublicKey) -> Result<(), CryptoError> {
        self.storage.delete(&private_key_entry(public_key))?;
        Ok(())
    }
}

fn private_key_entry(public_key: &AgreementPublicKey) -> String {
    format!("{PRIVATE_KEY_PREFIX}{}", public_key.to_hex())
}

fn agreement_entry(topic: &str) -> String {
    format!("{AGREEMENT_PREFIX}{topic}")
}
