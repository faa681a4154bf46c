//! Pairing and session negotiation on top of [`wc_core`].
//!
//! [`Client`] wires the services together; [`runtime::start`] runs one on a
//! dedicated worker thread so every engine mutation is serialized.

pub mod client;
pub mod config;
mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod pairing;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod transport;

pub use client::Client;
pub use config::{EngineConfig, TtlConfig};
pub use error::{EngineError, TransportError};
pub use events::{EngineEvent, EventBus};
pub use history::JsonRpcHistory;
pub use pairing::PairingEngine;
pub use relay::{Relay, RelayEvent};
pub use runtime::ClientHandle;
pub use session::SessionEngine;
pub use store::{ExpirationObserver, SequenceStore};
pub use subscriber::{Subscriber, SubscriptionPayload};
pub use transport::Transport;
