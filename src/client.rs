//! Client struct definition
//!
//! Represents a connected peer as seen by the dispatcher: identity,
//! claimed name, current room, and the bounded outbound queue.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Connected client information
///
/// Owned exclusively by the dispatcher; the connection handler only holds
/// the receiving end of the outbound queue. `name` and `room` are `None`
/// until set by a successful `hello` / `join`.
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Peer address, for logging
    pub addr: String,
    /// Display name (None before hello)
    pub name: Option<String>,
    /// Current room (None before the first join)
    pub room: Option<String>,
    /// Bounded outbound queue to this connection's writer task
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Client {
    /// Create a new client with the given ID, address and sender channel
    pub fn new(id: ClientId, addr: String, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            name: None,
            room: None,
            sender,
        }
    }

    /// Non-blocking enqueue of an outbound event
    ///
    /// A full queue is the lossy-backpressure case: the event is dropped for
    /// this recipient and the caller decides whether that matters. A closed
    /// queue means the writer task has terminated.
    pub fn try_deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Check if this client has claimed a name
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// Display name, or the peer address before hello
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let id = ClientId::new();
        let client = Client::new(id, "127.0.0.1:1234".to_string(), tx);

        assert_eq!(client.id, id);
        assert!(client.name.is_none());
        assert!(client.room.is_none());
        assert!(!client.has_name());
        assert_eq!(client.display_name(), "127.0.0.1:1234");
    }

    #[test]
    fn test_try_deliver() {
        let (tx, mut rx) = mpsc::channel(2);
        let client = Client::new(ClientId::new(), "test".to_string(), tx);

        client.try_deliver(ServerMessage::info("one")).unwrap();
        client.try_deliver(ServerMessage::info("two")).unwrap();

        // Queue is full now
        let err = client.try_deliver(ServerMessage::info("three")).unwrap_err();
        assert!(matches!(err, DeliveryError::QueueFull));

        // Draining makes room again
        assert!(rx.try_recv().is_ok());
        client.try_deliver(ServerMessage::info("four")).unwrap();
    }

    #[test]
    fn test_try_deliver_closed() {
        let (tx, rx) = mpsc::channel(2);
        let client = Client::new(ClientId::new(), "test".to_string(), tx);
        drop(rx);

        let err = client.try_deliver(ServerMessage::info("x")).unwrap_err();
        assert!(matches!(err, DeliveryError::Closed));
    }
}
