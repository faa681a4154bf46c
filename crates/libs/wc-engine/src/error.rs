use thiserror::Error;
use wc_core::{CryptoError, ProtocolError, StorageError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl EngineError {
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            EngineError::Protocol(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}
