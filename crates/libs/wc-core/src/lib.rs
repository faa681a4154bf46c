//! Protocol core for topic-addressed pairing and session negotiation.
//!
//! This crate holds everything that does not need a transport: key agreement,
//! the wire codec, CAIP identifier validation, the pairing URI, JSON-RPC
//! framing, sequence types and the key/value storage contract.

pub mod caip;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod jsonrpc;
pub mod lifecycle;
pub mod params;
pub mod sequence;
pub mod storage;
pub mod time;
pub mod types;
pub mod uri;

pub use crypto::{AgreementPublicKey, AgreementSecret, KeyAgreementService};
pub use error::{CryptoError, ProtocolError, StorageError};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcRecord, JsonRpcRequest, JsonRpcResponse, WcMethod,
};
pub use lifecycle::SessionOperation;
pub use sequence::{ExpirableSequence, Pairing, PairingState, Session, SessionState};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
pub use time::{Clock, ManualClock, SystemClock};
pub use types::{AppMetadata, PairingPermissions, Reason, RelayProtocolOptions, SessionPermissions};
pub use uri::WalletConnectUri;

pub const PROTOCOL_VERSION: &str = "2";
pub const DEFAULT_RELAY_PROTOCOL: &str = "waku";
