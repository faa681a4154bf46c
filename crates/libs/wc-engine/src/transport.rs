use crate::error::TransportError;

/// Topic-addressed pub/sub relay. Inbound traffic is fed back through
/// [`crate::Client::handle_transport_message`] or
/// [`crate::ClientHandle::deliver`].
pub trait Transport: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// `prompt` asks the relay to wake the receiving peer.
    fn publish(&self, topic: &str, message: &str, prompt: bool) -> Result<(), TransportError>;
}
