//! Shared fixtures for end-to-end tests of the negotiation engines.

pub mod network;
pub mod peer;

pub use network::{Delivery, Envelope, MemoryRelayNetwork, MemoryTransport};
pub use peer::{init_logging, pump, PumpReport, TestPeer, START_SECS};

use wc_core::{Pairing, PairingPermissions, SessionPermissions};
use wc_engine::EngineEvent;

/// Pairs `proposer` with `responder` and returns the settled pairing as the
/// proposer sees it.
pub fn settle_pairing(
    network: &MemoryRelayNetwork,
    proposer: &TestPeer,
    responder: &TestPeer,
) -> Pairing {
    let uri = proposer.client.pairing().propose(PairingPermissions::default()).expect("propose");
    responder.client.pairing().approve(&uri).expect("approve");
    let report = pump(network, &[proposer, responder]);
    assert!(report.errors.is_empty(), "pairing traffic failed: {:?}", report.errors);
    proposer
        .events()
        .into_iter()
        .find_map(|event| match event {
            EngineEvent::PairingApproved { pairing } => Some(pairing),
            _ => None,
        })
        .expect("proposer saw PairingApproved")
}

pub fn eth_permissions() -> SessionPermissions {
    SessionPermissions {
        chains: vec!["eip155:1".to_string()],
        methods: vec!["eth_sendTransaction".to_string(), "personal_sign".to_string()],
        notifications: vec!["accountsChanged".to_string()],
    }
}

pub const ALICE_ACCOUNT: &str = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";
