use crate::error::TransportError;
use crate::transport::Transport;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionPayload {
    pub topic: String,
    pub message: String,
}

/// Tracks relay subscriptions and filters inbound traffic to subscribed topics.
pub struct Subscriber {
    transport: Arc<dyn Transport>,
    topics: Mutex<BTreeSet<String>>,
}

impl Subscriber {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, topics: Mutex::new(BTreeSet::new()) }
    }

    /// Subscribes on the relay, then records the topic. The topic set is not
    /// locked while the transport runs.
    pub fn set_subscription(&self, topic: &str) -> Result<(), TransportError> {
        if self.is_subscribed(topic) {
            return Ok(());
        }
        self.transport.subscribe(topic)?;
        self.topics.lock().expect("subscriber topics mutex poisoned").insert(topic.to_string());
        log::debug!("subscribed to {topic}");
        Ok(())
    }

    /// Unsubscribes on the relay and forgets the topic only once that worked.
    pub fn remove_subscription(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_subscribed(topic) {
            return Ok(());
        }
        self.transport.unsubscribe(topic)?;
        self.topics.lock().expect("subscriber topics mutex poisoned").remove(topic);
        log::debug!("unsubscribed from {topic}");
        Ok(())
    }

    pub fn get_topics(&self) -> Vec<String> {
        self.topics.lock().expect("subscriber topics mutex poisoned").iter().cloned().collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().expect("subscriber topics mutex poisoned").contains(topic)
    }

    pub fn receive(&self, topic: &str, message: &str) -> Option<SubscriptionPayload> {
        if !self.is_subscribed(topic) {
            log::debug!("dropping payload on unsubscribed topic {topic}");
            return None;
        }
        Some(SubscriptionPayload { topic: topic.to_string(), message: message.to_string() })
    }
}
