use crate::network::{MemoryRelayNetwork, MemoryTransport};
use std::sync::Arc;
use wc_core::{AppMetadata, KeyValueStorage, ManualClock, MemoryStorage};
use wc_engine::{Client, EngineConfig, EngineError, EngineEvent};

pub const START_SECS: u64 = 1_700_000_000;

/// One side of a negotiation: a client on its own storage and manual clock.
pub struct TestPeer {
    pub name: String,
    pub client: Client,
    pub clock: ManualClock,
    pub storage: Arc<dyn KeyValueStorage>,
    pub transport: Arc<MemoryTransport>,
}

impl TestPeer {
    pub fn new(network: &Arc<MemoryRelayNetwork>, name: &str, controller: bool) -> Self {
        Self::with_storage(network, name, controller, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(
        network: &Arc<MemoryRelayNetwork>,
        name: &str,
        controller: bool,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        Self::with_clock(network, name, controller, storage, ManualClock::new(START_SECS))
    }

    pub fn with_clock(
        network: &Arc<MemoryRelayNetwork>,
        name: &str,
        controller: bool,
        storage: Arc<dyn KeyValueStorage>,
        clock: ManualClock,
    ) -> Self {
        let config = EngineConfig {
            controller,
            metadata: Some(AppMetadata { name: name.to_string(), ..AppMetadata::default() }),
            ..EngineConfig::default()
        };
        let transport = network.transport(name);
        let client =
            Client::new(config, storage.clone(), transport.clone(), Arc::new(clock.clone()));
        Self { name: name.to_string(), client, clock, storage, transport }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.client.drain_events()
    }
}

#[derive(Debug, Default)]
pub struct PumpReport {
    pub delivered: usize,
    pub errors: Vec<(String, EngineError)>,
}

/// Delivers queued traffic until the network is quiet.
pub fn pump(network: &MemoryRelayNetwork, peers: &[&TestPeer]) -> PumpReport {
    let mut report = PumpReport::default();
    loop {
        let deliveries = network.next_deliveries();
        if deliveries.is_empty() {
            return report;
        }
        for delivery in deliveries {
            let Some(peer) = peers.iter().find(|peer| peer.name == delivery.recipient) else {
                continue;
            };
            report.delivered += 1;
            let envelope = delivery.envelope;
            let handled = peer.client.handle_transport_message(&envelope.topic, &envelope.message);
            if let Err(err) = handled {
                log::debug!("{} rejected delivery on {}: {err}", peer.name, envelope.topic);
                report.errors.push((peer.name.clone(), err));
            }
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
