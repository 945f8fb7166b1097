use crate::connection::ConnectionId;
use events::Event;
use std::collections::HashSet;

/// An outgoing event together with who should receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub event: Event,
    pub scope: MessageScope,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageScope {
    /// Send only to one connection, whether or not it has registered
    Direct { connection_id: ConnectionId },
    /// Send to every registered connection except the listed ones
    Broadcast { exclude: HashSet<ConnectionId> },
}

impl Message {
    pub fn direct(event: Event, connection_id: ConnectionId) -> Self {
        Self {
            event,
            scope: MessageScope::Direct { connection_id },
        }
    }

    /// Broadcast to everyone but the originating connection.
    pub fn broadcast_except(event: Event, sender: ConnectionId) -> Self {
        Self {
            event,
            scope: MessageScope::Broadcast {
                exclude: HashSet::from([sender]),
            },
        }
    }
}
