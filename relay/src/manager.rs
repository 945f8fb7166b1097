use crate::connection::{ConnectionId, ConnectionRegistry, Delivery, Frame, Outbox};
use crate::message::{Message, MessageScope};
use events::{Event, EventType};
use log::*;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

/// Broadcast dispatcher: encodes events once and routes the frame by scope.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
}

impl Manager {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ConnectionRegistry::new()))
    }

    pub fn with_registry(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Attach a new connection and return its unique ID
    pub fn register_connection(&self, peer_addr: SocketAddr, outbox: Outbox) -> ConnectionId {
        let connection_id = self.registry.attach(peer_addr, outbox);
        debug!("Attached connection {connection_id} from {peer_addr}");
        connection_id
    }

    /// Detach a connection by ID, dropping its outgoing queue
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        debug!("Detaching connection {connection_id}");
        self.registry.detach(connection_id);
    }

    /// Send a message based on its scope
    pub fn send_message(&self, message: Message) -> Delivery {
        match message.scope {
            MessageScope::Direct { connection_id } => {
                let delivered = self.respond(&message.event, &connection_id);
                Delivery {
                    delivered: usize::from(delivered),
                    failed: if delivered { Vec::new() } else { vec![connection_id] },
                }
            }
            MessageScope::Broadcast { exclude } => self.broadcast(&message.event, &exclude),
        }
    }

    /// Deliver to every registered connection not in `exclude`.
    pub fn broadcast(&self, event: &Event, exclude: &HashSet<ConnectionId>) -> Delivery {
        let Some(frame) = Self::encode(event) else {
            return Delivery::default();
        };

        let delivery = self.registry.broadcast(frame, exclude);
        debug!(
            "Broadcast {} to {} connection(s), {} failed",
            event.event_type(),
            delivery.delivered,
            delivery.failed.len()
        );
        delivery
    }

    /// Deliver to a single connection.
    pub fn respond(&self, event: &Event, connection_id: &ConnectionId) -> bool {
        match Self::encode(event) {
            Some(frame) => self.registry.send_to(connection_id, frame),
            None => false,
        }
    }

    fn encode(event: &Event) -> Option<Frame> {
        match events::encode(event) {
            Ok(line) => Some(Frame::from(line)),
            Err(e) => {
                error!("Failed to encode {} event: {e}", event.event_type());
                None
            }
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
