//! A relay that lives in memory. Publishes are queued per subscriber and only
//! delivered when a test pumps the network, so every hop is observable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use wc_engine::{Transport, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub topic: String,
    pub message: String,
    pub prompt: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: String,
    pub envelope: Envelope,
}

#[derive(Default)]
struct NetworkState {
    subscriptions: BTreeMap<String, BTreeSet<String>>,
    queue: VecDeque<Delivery>,
    published: Vec<Envelope>,
}

#[derive(Default)]
pub struct MemoryRelayNetwork {
    state: Mutex<NetworkState>,
    fail_publishes: AtomicBool,
}

impl MemoryRelayNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, peer: &str) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport { peer: peer.to_string(), network: Arc::clone(self) })
    }

    /// Makes every following publish fail until reset.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Envelope> {
        self.state.lock().expect("network state mutex poisoned").published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.published().into_iter().filter(|envelope| envelope.topic == topic).collect()
    }

    pub fn is_subscribed(&self, peer: &str, topic: &str) -> bool {
        let state = self.state.lock().expect("network state mutex poisoned");
        state.subscriptions.get(topic).is_some_and(|peers| peers.contains(peer))
    }

    pub fn pending(&self) -> usize {
        self.state.lock().expect("network state mutex poisoned").queue.len()
    }

    /// Takes every queued delivery.
    pub fn next_deliveries(&self) -> Vec<Delivery> {
        let mut state = self.state.lock().expect("network state mutex poisoned");
        state.queue.drain(..).collect()
    }

    /// Queues a message as if `sender` had published it.
    pub fn inject(&self, sender: &str, topic: &str, message: &str) {
        let envelope = Envelope {
            sender: sender.to_string(),
            topic: topic.to_string(),
            message: message.to_string(),
            prompt: false,
        };
        self.enqueue(envelope);
    }

    fn enqueue(&self, envelope: Envelope) {
        let mut state = self.state.lock().expect("network state mutex poisoned");
        let recipients: Vec<String> = state
            .subscriptions
            .get(&envelope.topic)
            .map(|peers| peers.iter().filter(|peer| **peer != envelope.sender).cloned().collect())
            .unwrap_or_default();
        for recipient in recipients {
            state.queue.push_back(Delivery { recipient, envelope: envelope.clone() });
        }
        state.published.push(envelope);
    }
}

pub struct MemoryTransport {
    peer: String,
    network: Arc<MemoryRelayNetwork>,
}

impl Transport for MemoryTransport {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().expect("network state mutex poisoned");
        state.subscriptions.entry(topic.to_string()).or_default().insert(self.peer.clone());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut state = self.network.state.lock().expect("network state mutex poisoned");
        if let Some(peers) = state.subscriptions.get_mut(topic) {
            peers.remove(&self.peer);
            if peers.is_empty() {
                state.subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    fn publish(&self, topic: &str, message: &str, prompt: bool) -> Result<(), TransportError> {
        if self.network.fail_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::new(format!("relay refused publish on {topic}")));
        }
        self.network.enqueue(Envelope {
            sender: self.peer.clone(),
            topic: topic.to_string(),
            message: message.to_string(),
            prompt,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_reach_other_subscribers_only() {
        let network = MemoryRelayNetwork::new();
        let alice = network.transport("alice");
        let bob = network.transport("bob");
        alice.subscribe("t").expect("sub");
        bob.subscribe("t").expect("sub");

        alice.publish("t", "00", false).expect("publish");
        let deliveries = network.next_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].recipient, "bob");

        bob.unsubscribe("t").expect("unsub");
        alice.publish("t", "01", true).expect("publish");
        assert!(network.next_deliveries().is_empty());
        assert_eq!(network.published_on("t").len(), 2);
        assert!(network.published()[1].prompt);
    }

    #[test]
    fn failing_network_rejects_publishes() {
        let network = MemoryRelayNetwork::new();
        let alice = network.transport("alice");
        network.fail_publishes(true);
        assert!(alice.publish("t", "00", false).is_err());
        assert!(network.published().is_empty());
    }
}
