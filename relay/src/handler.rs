//! Per-connection protocol state machine.
//!
//! The handler never touches the socket. It turns one inbound `Event` into
//! at most one outgoing `Message`, which the caller hands to the `Manager`.
//!
//! ```text
//! Unregistered --Connect ok--> Registered --close / Disconnect--> Terminated
//!      |                                                              ^
//!      +------------------------------close---------------------------+
//! ```
//!
//! Only `Connect` is accepted before the handshake succeeds. Everything else
//! from an unregistered connection is dropped.

use crate::connection::{ConnectionId, ConnectionRegistry, Registration, Rename};
use crate::message::Message;
use events::{DisplayName, Event, EventType, UnknownEvent};
use log::*;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Unregistered,
    Registered,
    Terminated,
}

pub struct ConnectionHandler {
    connection_id: ConnectionId,
    peer_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    state: HandlerState,
}

impl ConnectionHandler {
    pub fn new(
        connection_id: ConnectionId,
        peer_addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            connection_id,
            peer_addr,
            registry,
            state: HandlerState::Unregistered,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == HandlerState::Terminated
    }

    /// Interpret one inbound event.
    pub fn handle(&mut self, event: Event) -> Option<Message> {
        match (self.state, event) {
            (HandlerState::Terminated, event) => {
                debug!(
                    "Ignoring {} from terminated connection {}",
                    event.event_type(),
                    self.peer_addr
                );
                None
            }
            (_, Event::Connect { display_name }) => self.on_connect(display_name),
            (HandlerState::Unregistered, event) => {
                warn!(
                    "Dropping {} from {}: connect handshake not completed",
                    event.event_type(),
                    self.peer_addr
                );
                None
            }
            (HandlerState::Registered, Event::RenameRequest {
                new_display_name, ..
            }) => self.on_rename(new_display_name),
            (HandlerState::Registered, Event::Chat { data, .. }) => self.on_chat(data),
            (HandlerState::Registered, Event::Disconnect { .. }) => self.close(),
            (
                HandlerState::Registered,
                event @ (Event::ConnectRejected { .. } | Event::RenameRejected { .. }),
            ) => {
                warn!(
                    "Dropping server-only {} event sent by {}",
                    event.event_type(),
                    self.peer_addr
                );
                None
            }
            (HandlerState::Registered, Event::Unknown(unknown)) => self.on_unknown(unknown),
        }
    }

    /// Run the close path: release the display name and tell everyone else.
    ///
    /// Safe to call more than once; only the first call can produce a message.
    pub fn close(&mut self) -> Option<Message> {
        if self.is_terminated() {
            return None;
        }
        self.state = HandlerState::Terminated;

        let display_name = self.registry.unregister(&self.connection_id)?;
        Some(Message::broadcast_except(
            Event::Disconnect { display_name },
            self.connection_id.clone(),
        ))
    }

    fn on_connect(&mut self, display_name: DisplayName) -> Option<Message> {
        if self.state == HandlerState::Registered {
            warn!(
                "Ignoring repeated connect from {} as {display_name}",
                self.peer_addr
            );
            return None;
        }

        match self
            .registry
            .try_register(&self.connection_id, display_name.clone())
        {
            Registration::Registered => {
                self.state = HandlerState::Registered;
                info!(
                    "Client connected: {}. Username: {display_name}.",
                    self.peer_addr
                );
                Some(Message::broadcast_except(
                    Event::Connect { display_name },
                    self.connection_id.clone(),
                ))
            }
            Registration::Conflict => {
                debug!(
                    "Rejected connect from {}: {display_name} is taken",
                    self.peer_addr
                );
                Some(Message::direct(
                    Event::ConnectRejected { display_name },
                    self.connection_id.clone(),
                ))
            }
            Registration::AlreadyRegistered | Registration::Detached => {
                warn!(
                    "Connect from {} arrived for a connection in an unexpected state",
                    self.peer_addr
                );
                None
            }
        }
    }

    fn on_rename(&mut self, new_display_name: DisplayName) -> Option<Message> {
        match self
            .registry
            .try_rename(&self.connection_id, new_display_name.clone())
        {
            Rename::Renamed { previous } => {
                info!(
                    "Client {} changed username: {previous} -> {new_display_name}",
                    self.peer_addr
                );
                Some(Message::broadcast_except(
                    Event::RenameRequest {
                        display_name: previous,
                        new_display_name,
                    },
                    self.connection_id.clone(),
                ))
            }
            Rename::NoOp => None,
            Rename::Conflict => Some(Message::direct(
                Event::RenameRejected {
                    conflicting_name: new_display_name,
                },
                self.connection_id.clone(),
            )),
            Rename::Unregistered => {
                warn!("Rename from {} has no registered name", self.peer_addr);
                None
            }
        }
    }

    fn on_chat(&self, data: String) -> Option<Message> {
        let Some(display_name) = self.registry.current_name(&self.connection_id) else {
            warn!("Chat from {} has no registered name", self.peer_addr);
            return None;
        };

        Some(Message::broadcast_except(
            Event::Chat { display_name, data },
            self.connection_id.clone(),
        ))
    }

    fn on_unknown(&self, unknown: UnknownEvent) -> Option<Message> {
        debug!(
            "Forwarding unrecognised {} event from {}",
            unknown.kind(),
            self.peer_addr
        );
        Some(Message::broadcast_except(
            Event::Unknown(unknown),
            self.connection_id.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Frame, Outbox, FRAME_QUEUE_CAPACITY};
    use crate::message::MessageScope;
    use serde_json::json;
    use std::collections::HashSet;
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        // Keep queues open so registrations stay deliverable.
        queues: Vec<Receiver<Frame>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(ConnectionRegistry::new()),
                queues: Vec::new(),
            }
        }

        fn connection(&mut self) -> ConnectionHandler {
            let (outbox, rx) = Outbox::new(FRAME_QUEUE_CAPACITY);
            let peer = SocketAddr::from(([127, 0, 0, 1], 41000));
            let id = self.registry.attach(peer, outbox);
            self.queues.push(rx);
            ConnectionHandler::new(id, peer, Arc::clone(&self.registry))
        }

        fn connected(&mut self, name: &str) -> ConnectionHandler {
            let mut handler = self.connection();
            handler.handle(connect(name));
            assert_eq!(handler.state(), HandlerState::Registered);
            handler
        }
    }

    fn connect(name: &str) -> Event {
        Event::Connect {
            display_name: name.to_string(),
        }
    }

    fn rename(from: &str, to: &str) -> Event {
        Event::RenameRequest {
            display_name: from.to_string(),
            new_display_name: to.to_string(),
        }
    }

    fn chat(name: &str, data: &str) -> Event {
        Event::Chat {
            display_name: name.to_string(),
            data: data.to_string(),
        }
    }

    fn excluding(handler: &ConnectionHandler) -> MessageScope {
        MessageScope::Broadcast {
            exclude: HashSet::from([handler.connection_id().clone()]),
        }
    }

    #[test]
    fn test_connect_broadcasts_to_others() {
        let mut harness = Harness::new();
        let mut alice = harness.connection();

        let message = alice.handle(connect("alice")).unwrap();

        assert_eq!(alice.state(), HandlerState::Registered);
        assert_eq!(message.event, connect("alice"));
        assert_eq!(message.scope, excluding(&alice));
    }

    #[test]
    fn test_duplicate_connect_is_rejected_directly() {
        let mut harness = Harness::new();
        let _alice = harness.connected("alice");
        let mut impostor = harness.connection();

        let message = impostor.handle(connect("alice")).unwrap();

        assert_eq!(impostor.state(), HandlerState::Unregistered);
        assert_eq!(
            message.event,
            Event::ConnectRejected {
                display_name: "alice".to_string()
            }
        );
        assert_eq!(
            message.scope,
            MessageScope::Direct {
                connection_id: impostor.connection_id().clone()
            }
        );
    }

    #[test]
    fn test_rejected_connection_may_retry_with_other_name() {
        let mut harness = Harness::new();
        let _alice = harness.connected("alice");
        let mut late = harness.connection();

        late.handle(connect("alice"));
        let message = late.handle(connect("alice2")).unwrap();

        assert_eq!(late.state(), HandlerState::Registered);
        assert_eq!(message.event, connect("alice2"));
    }

    #[test]
    fn test_repeated_connect_is_ignored() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        assert_eq!(alice.handle(connect("someone-else")), None);
        assert_eq!(
            harness.registry.current_name(alice.connection_id()).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_chat_uses_server_side_name() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        let message = alice.handle(chat("mallory", "hi")).unwrap();

        assert_eq!(message.event, chat("alice", "hi"));
        assert_eq!(message.scope, excluding(&alice));
    }

    #[test]
    fn test_chat_after_rename_uses_new_name() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        alice.handle(rename("alice", "carol"));
        let message = alice.handle(chat("alice", "it's me")).unwrap();

        assert_eq!(message.event, chat("carol", "it's me"));
    }

    #[test]
    fn test_rename_broadcasts_previous_and_new_name() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        let message = alice.handle(rename("ignored", "carol")).unwrap();

        assert_eq!(message.event, rename("alice", "carol"));
        assert_eq!(message.scope, excluding(&alice));
    }

    #[test]
    fn test_rename_to_current_name_produces_nothing() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        assert_eq!(alice.handle(rename("alice", "alice")), None);
    }

    #[test]
    fn test_rename_conflict_rejected_directly() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");
        let _bob = harness.connected("bob");

        let message = alice.handle(rename("alice", "bob")).unwrap();

        assert_eq!(
            message.event,
            Event::RenameRejected {
                conflicting_name: "bob".to_string()
            }
        );
        assert_eq!(
            message.scope,
            MessageScope::Direct {
                connection_id: alice.connection_id().clone()
            }
        );
        assert_eq!(
            harness.registry.current_name(alice.connection_id()).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_unregistered_connection_cannot_chat_or_rename() {
        let mut harness = Harness::new();
        let _bob = harness.connected("bob");
        let mut anon = harness.connection();

        assert_eq!(anon.handle(chat("anon", "hello?")), None);
        assert_eq!(anon.handle(rename("anon", "carol")), None);
        assert_eq!(harness.registry.owner_of("carol"), None);
        assert_eq!(anon.state(), HandlerState::Unregistered);
    }

    #[test]
    fn test_unregistered_connection_cannot_forward_unknown_events() {
        let mut harness = Harness::new();
        let mut anon = harness.connection();
        let unknown = events::decode(br#"{"type":"typing"}"#).unwrap();

        assert_eq!(anon.handle(unknown), None);
    }

    #[test]
    fn test_unknown_event_forwarded_unchanged() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");
        let frame = json!({"type": "typing", "username": "whoever", "active": true}).to_string();
        let unknown = events::decode(frame.as_bytes()).unwrap();

        let message = alice.handle(unknown.clone()).unwrap();

        assert_eq!(message.event, unknown);
        assert_eq!(message.scope, excluding(&alice));
    }

    #[test]
    fn test_server_only_events_from_client_are_dropped() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        assert_eq!(
            alice.handle(Event::RenameRejected {
                conflicting_name: "bob".to_string()
            }),
            None
        );
        assert_eq!(
            alice.handle(Event::ConnectRejected {
                display_name: "bob".to_string()
            }),
            None
        );
    }

    #[test]
    fn test_close_broadcasts_disconnect_and_frees_name() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        let message = alice.close().unwrap();

        assert!(alice.is_terminated());
        assert_eq!(
            message.event,
            Event::Disconnect {
                display_name: "alice".to_string()
            }
        );
        assert_eq!(message.scope, excluding(&alice));

        let mut next = harness.connection();
        assert_eq!(next.handle(connect("alice")).unwrap().event, connect("alice"));
    }

    #[test]
    fn test_close_of_unregistered_connection_is_silent() {
        let mut harness = Harness::new();
        let mut anon = harness.connection();

        assert_eq!(anon.close(), None);
        assert!(anon.is_terminated());
    }

    #[test]
    fn test_explicit_disconnect_runs_close_path_once() {
        let mut harness = Harness::new();
        let mut alice = harness.connected("alice");

        let message = alice
            .handle(Event::Disconnect {
                display_name: "alice".to_string(),
            })
            .unwrap();

        assert_eq!(
            message.event,
            Event::Disconnect {
                display_name: "alice".to_string()
            }
        );
        assert!(alice.is_terminated());
        assert_eq!(alice.close(), None);
        assert_eq!(alice.handle(chat("alice", "too late")), None);
    }
}
