use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("no sequence for topic {0}")]
    NoSequenceForTopic(String),
    #[error("session on topic {0} is not settled")]
    SessionNotSettled(String),
    #[error("pairing on topic {0} is not settled")]
    PairingNotSettled(String),
    #[error("local peer is not the controller of topic {0}")]
    NotController(String),
    #[error("invalid permissions: {0}")]
    InvalidPermissions(String),
    #[error("invalid account: {0}")]
    InvalidAccount(String),
    #[error("json-rpc request {0} is already recorded")]
    RequestDuplicate(i64),
    #[error("json-rpc response {0} is already resolved")]
    ResponseDuplicate(i64),
    #[error("no json-rpc record for id {0}")]
    NoRecordForId(i64),
    #[error("pairing uri for topic {0} is already being approved")]
    PairingAlreadyApproving(String),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: &'static str, to: &'static str },
    #[error("{operation} is not allowed while the session is {state}")]
    IllegalOperation { operation: &'static str, state: &'static str },
    #[error("json-rpc method {0} is not permitted")]
    UnauthorizedMethod(String),
    #[error("notification type {0} is not permitted")]
    UnauthorizedNotification(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("session ttl {0} is out of range")]
    InvalidTtl(u64),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid peer public key: {0}")]
    InvalidPeerKey(String),
    #[error("no private key stored for public key {0}")]
    MissingPrivateKey(String),
    #[error("no agreement secret stored for topic {0}")]
    MissingAgreement(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("message authentication failed")]
    Authentication,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("storage serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
