use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::DisplayName;
use log::*;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// An encoded, newline-terminated event. Encoded once and shared by every recipient.
pub type Frame = Arc<str>;

/// Frames a connection may have waiting for its writer before it counts as stalled.
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// Bounded queue feeding a connection's writer task.
///
/// A push that finds the queue full wakes `overflow_signal` waiters so the
/// owning connection can be closed instead of buffering without limit.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<Frame>,
    overflowed: Arc<Notify>,
}

impl Outbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let outbox = Self {
            sender,
            overflowed: Arc::new(Notify::new()),
        };
        (outbox, receiver)
    }

    /// Resolves once a push has been refused because the queue was full.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.overflowed)
    }

    fn push(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        let pushed = self.sender.try_send(frame);
        if let Err(TrySendError::Full(_)) = pushed {
            self.overflowed.notify_one();
        }
        pushed
    }
}

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State kept for every live connection.
///
/// `display_name` is `Some` once the connect handshake has succeeded; only
/// those connections receive broadcasts.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_addr: SocketAddr,
    pub display_name: Option<DisplayName>,
    pub outbox: Outbox,
}

/// Outcome of a connect handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Another live connection already holds the name.
    Conflict,
    /// The connection completed its handshake earlier.
    AlreadyRegistered,
    /// The connection is not (or no longer) attached.
    Detached,
}

/// Outcome of a rename request.
#[derive(Debug, PartialEq, Eq)]
pub enum Rename {
    Renamed { previous: DisplayName },
    /// The requested name is the connection's current name.
    NoOp,
    /// Another live connection already holds the name.
    Conflict,
    /// The connection has no display name to change.
    Unregistered,
}

/// Result of fanning a frame out to several connections.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Registry of live connections with a secondary index enforcing unique display names.
///
/// Every name reservation goes through a `name_index` entry, which holds the
/// shard lock for that name while checking and inserting. No method holds a
/// guard on one map while acquiring a guard on the other.
pub struct ConnectionRegistry {
    /// Primary storage: every attached connection, registered or not
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: display name -> owning connection
    name_index: DashMap<DisplayName, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            name_index: DashMap::new(),
        }
    }

    /// Track a freshly accepted connection. It starts without a display name.
    pub fn attach(&self, peer_addr: SocketAddr, outbox: Outbox) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                peer_addr,
                display_name: None,
                outbox,
            },
        );
        connection_id
    }

    /// Forget a connection entirely, releasing its display name. Idempotent.
    ///
    /// Dropping the stored outbox lets the connection's writer drain its
    /// queue and finish.
    pub fn detach(&self, connection_id: &ConnectionId) -> Option<DisplayName> {
        let released = self.unregister(connection_id);
        self.connections.remove(connection_id);
        released
    }

    /// Claim `display_name` for the connection if no other live connection holds it.
    pub fn try_register(
        &self,
        connection_id: &ConnectionId,
        display_name: DisplayName,
    ) -> Registration {
        let already_registered = match self.connections.get(connection_id) {
            Some(info) => info.display_name.is_some(),
            None => return Registration::Detached,
        };
        if already_registered {
            return Registration::AlreadyRegistered;
        }

        match self.name_index.entry(display_name.clone()) {
            Entry::Occupied(_) => return Registration::Conflict,
            Entry::Vacant(slot) => {
                slot.insert(connection_id.clone());
            }
        }

        match self.connections.get_mut(connection_id) {
            Some(mut info) => {
                info.display_name = Some(display_name);
                Registration::Registered
            }
            None => {
                // Detached between the two steps; give the name back.
                self.release_name(&display_name, connection_id);
                Registration::Detached
            }
        }
    }

    /// Move the connection to `new_display_name` if no other live connection holds it.
    ///
    /// The new name is reserved before the old one is released, so for a
    /// moment both resolve to this connection. Neither is ever held by two.
    pub fn try_rename(&self, connection_id: &ConnectionId, new_display_name: DisplayName) -> Rename {
        let current = match self
            .connections
            .get(connection_id)
            .and_then(|info| info.display_name.clone())
        {
            Some(current) => current,
            None => return Rename::Unregistered,
        };

        if current == new_display_name {
            return Rename::NoOp;
        }

        match self.name_index.entry(new_display_name.clone()) {
            Entry::Occupied(_) => return Rename::Conflict,
            Entry::Vacant(slot) => {
                slot.insert(connection_id.clone());
            }
        }

        match self.connections.get_mut(connection_id) {
            Some(mut info) => info.display_name = Some(new_display_name),
            None => {
                self.release_name(&new_display_name, connection_id);
                return Rename::Unregistered;
            }
        }

        self.release_name(&current, connection_id);
        Rename::Renamed { previous: current }
    }

    /// Drop the connection's display name, returning it. Idempotent.
    ///
    /// The connection stays attached so frames already queued for it are still written.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<DisplayName> {
        let display_name = self
            .connections
            .get_mut(connection_id)
            .and_then(|mut info| info.display_name.take())?;
        self.release_name(&display_name, connection_id);
        Some(display_name)
    }

    pub fn current_name(&self, connection_id: &ConnectionId) -> Option<DisplayName> {
        self.connections
            .get(connection_id)
            .and_then(|info| info.display_name.clone())
    }

    /// Which connection currently holds `display_name`, if any.
    pub fn owner_of(&self, display_name: &str) -> Option<ConnectionId> {
        self.name_index
            .get(display_name)
            .map(|owner| owner.value().clone())
    }

    /// Number of attached connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections holding a display name.
    pub fn registered_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().display_name.is_some())
            .count()
    }

    /// Queue a frame for one connection, registered or not.
    pub fn send_to(&self, connection_id: &ConnectionId, frame: Frame) -> bool {
        match self.connections.get(connection_id) {
            Some(info) => match info.outbox.push(frame) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Failed to queue frame for {} ({}): {}. Connection will be cleaned up.",
                        info.peer_addr, connection_id, e
                    );
                    false
                }
            },
            None => {
                debug!("Connection {connection_id} is no longer attached, dropping frame");
                false
            }
        }
    }

    /// Queue a frame for every registered connection not in `exclude` - O(n)
    ///
    /// A full or closed queue only marks that connection as failed; the rest
    /// still receive the frame. A full queue also signals its overflow.
    pub fn broadcast(&self, frame: Frame, exclude: &HashSet<ConnectionId>) -> Delivery {
        let mut delivery = Delivery::default();

        for entry in self.connections.iter() {
            if entry.value().display_name.is_none() || exclude.contains(entry.key()) {
                continue;
            }

            match entry.value().outbox.push(Arc::clone(&frame)) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to queue broadcast for {} ({}): {}",
                        entry.value().peer_addr,
                        entry.key(),
                        e
                    );
                    delivery.failed.push(entry.key().clone());
                }
            }
        }

        delivery
    }

    fn release_name(&self, display_name: &str, connection_id: &ConnectionId) {
        self.name_index
            .remove_if(display_name, |_, owner| owner == connection_id);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tokio::sync::mpsc::Receiver;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn attach(registry: &ConnectionRegistry) -> (ConnectionId, Receiver<Frame>) {
        let (outbox, rx) = Outbox::new(FRAME_QUEUE_CAPACITY);
        (registry.attach(peer(40000), outbox), rx)
    }

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[test]
    fn test_register_then_current_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = attach(&registry);

        assert_eq!(registry.current_name(&alice), None);
        assert_eq!(
            registry.try_register(&alice, "alice".to_string()),
            Registration::Registered
        );
        assert_eq!(registry.current_name(&alice).as_deref(), Some("alice"));
        assert_eq!(registry.owner_of("alice"), Some(alice));
    }

    #[test]
    fn test_register_conflict_leaves_existing_owner() {
        let registry = ConnectionRegistry::new();
        let (alice, _a) = attach(&registry);
        let (other, _o) = attach(&registry);

        registry.try_register(&alice, "alice".to_string());
        assert_eq!(
            registry.try_register(&other, "alice".to_string()),
            Registration::Conflict
        );
        assert_eq!(registry.current_name(&other), None);
        assert_eq!(registry.owner_of("alice"), Some(alice));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let registry = ConnectionRegistry::new();
        let (lower, _l) = attach(&registry);
        let (upper, _u) = attach(&registry);

        registry.try_register(&lower, "alice".to_string());
        assert_eq!(
            registry.try_register(&upper, "Alice".to_string()),
            Registration::Registered
        );
    }

    #[test]
    fn test_second_handshake_is_already_registered() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = attach(&registry);

        registry.try_register(&alice, "alice".to_string());
        assert_eq!(
            registry.try_register(&alice, "alice2".to_string()),
            Registration::AlreadyRegistered
        );
        assert_eq!(registry.owner_of("alice2"), None);
    }

    #[test]
    fn test_register_unknown_connection_is_detached() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.try_register(&ConnectionId::new(), "ghost".to_string()),
            Registration::Detached
        );
        assert_eq!(registry.owner_of("ghost"), None);
    }

    #[test]
    fn test_rename_to_current_name_is_noop() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());

        assert_eq!(registry.try_rename(&alice, "alice".to_string()), Rename::NoOp);
        assert_eq!(registry.current_name(&alice).as_deref(), Some("alice"));
    }

    #[test]
    fn test_rename_conflict_keeps_old_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _a) = attach(&registry);
        let (bob, _b) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());
        registry.try_register(&bob, "bob".to_string());

        assert_eq!(registry.try_rename(&alice, "bob".to_string()), Rename::Conflict);
        assert_eq!(registry.current_name(&alice).as_deref(), Some("alice"));
        assert_eq!(registry.owner_of("bob"), Some(bob));
    }

    #[test]
    fn test_rename_releases_previous_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _a) = attach(&registry);
        let (other, _o) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());

        assert_eq!(
            registry.try_rename(&alice, "carol".to_string()),
            Rename::Renamed {
                previous: "alice".to_string()
            }
        );
        assert_eq!(registry.current_name(&alice).as_deref(), Some("carol"));
        assert_eq!(
            registry.try_register(&other, "alice".to_string()),
            Registration::Registered
        );
    }

    #[test]
    fn test_rename_before_handshake_is_unregistered() {
        let registry = ConnectionRegistry::new();
        let (anon, _rx) = attach(&registry);
        assert_eq!(
            registry.try_rename(&anon, "carol".to_string()),
            Rename::Unregistered
        );
        assert_eq!(registry.owner_of("carol"), None);
    }

    #[test]
    fn test_unregister_is_idempotent_and_frees_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _a) = attach(&registry);
        let (next, _n) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());

        assert_eq!(registry.unregister(&alice).as_deref(), Some("alice"));
        assert_eq!(registry.unregister(&alice), None);
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(
            registry.try_register(&next, "alice".to_string()),
            Registration::Registered
        );
    }

    #[test]
    fn test_detach_removes_connection_and_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());

        assert_eq!(registry.detach(&alice).as_deref(), Some("alice"));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.owner_of("alice"), None);
        assert_eq!(registry.detach(&alice), None);
    }

    #[test]
    fn test_broadcast_skips_excluded_and_unregistered() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = attach(&registry);
        let (bob, mut bob_rx) = attach(&registry);
        let (_anon, mut anon_rx) = attach(&registry);
        registry.try_register(&alice, "alice".to_string());
        registry.try_register(&bob, "bob".to_string());

        let exclude = HashSet::from([alice.clone()]);
        let delivery = registry.broadcast(frame("hello\n"), &exclude);

        assert_eq!(delivery.delivered, 1);
        assert!(delivery.failed.is_empty());
        assert_eq!(bob_rx.try_recv().unwrap().as_ref(), "hello\n");
        assert!(alice_rx.try_recv().is_err());
        assert!(anon_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_isolates_closed_queue() {
        let registry = ConnectionRegistry::new();
        let (x, x_rx) = attach(&registry);
        let (y, mut y_rx) = attach(&registry);
        let (z, mut z_rx) = attach(&registry);
        registry.try_register(&x, "x".to_string());
        registry.try_register(&y, "y".to_string());
        registry.try_register(&z, "z".to_string());
        drop(x_rx);

        let delivery = registry.broadcast(frame("ping\n"), &HashSet::new());

        assert_eq!(delivery.delivered, 2);
        assert_eq!(delivery.failed, vec![x]);
        assert_eq!(y_rx.try_recv().unwrap().as_ref(), "ping\n");
        assert_eq!(z_rx.try_recv().unwrap().as_ref(), "ping\n");
    }

    #[tokio::test]
    async fn test_full_queue_fails_delivery_and_signals_overflow() {
        let registry = ConnectionRegistry::new();
        let (stalled_outbox, _stalled_rx) = Outbox::new(1);
        let overflow = stalled_outbox.overflow_signal();
        let stalled = registry.attach(peer(40001), stalled_outbox);
        let (bob, mut bob_rx) = attach(&registry);
        registry.try_register(&stalled, "stalled".to_string());
        registry.try_register(&bob, "bob".to_string());

        let first = registry.broadcast(frame("one\n"), &HashSet::new());
        let second = registry.broadcast(frame("two\n"), &HashSet::new());

        assert_eq!(first.delivered, 2);
        assert_eq!(second.delivered, 1);
        assert_eq!(second.failed, vec![stalled.clone()]);
        assert!(!registry.send_to(&stalled, frame("three\n")));
        assert_eq!(bob_rx.try_recv().unwrap().as_ref(), "one\n");
        assert_eq!(bob_rx.try_recv().unwrap().as_ref(), "two\n");
        tokio::time::timeout(std::time::Duration::from_millis(100), overflow.notified())
            .await
            .expect("overflow was not signalled");
    }

    #[test]
    fn test_send_to_reaches_unregistered_connection() {
        let registry = ConnectionRegistry::new();
        let (anon, mut rx) = attach(&registry);

        assert!(registry.send_to(&anon, frame("direct\n")));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "direct\n");
        assert!(!registry.send_to(&ConnectionId::new(), frame("lost\n")));
    }

    #[test]
    fn test_concurrent_registrations_of_same_name_admit_one() {
        const CONTENDERS: usize = 16;
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        let ids: Vec<ConnectionId> = (0..CONTENDERS)
            .map(|_| {
                let (id, rx) = attach(&registry);
                receivers.push(rx);
                id
            })
            .collect();
        let barrier = Arc::new(Barrier::new(CONTENDERS));

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.try_register(&id, "contested".to_string())
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|outcome| *outcome == Registration::Registered)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.registered_count(), 1);
    }

    #[test]
    fn test_concurrent_renames_to_same_name_admit_one() {
        const CONTENDERS: usize = 16;
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for n in 0..CONTENDERS {
            let (id, rx) = attach(&registry);
            registry.try_register(&id, format!("user-{n}"));
            receivers.push(rx);
            ids.push(id);
        }
        let barrier = Arc::new(Barrier::new(CONTENDERS));

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.try_rename(&id, "contested".to_string())
                })
            })
            .collect();

        let renamed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|outcome| matches!(outcome, Rename::Renamed { .. }))
            .count();

        assert_eq!(renamed, 1);
        let holders = ids
            .iter()
            .filter(|id| registry.current_name(id).as_deref() == Some("contested"))
            .count();
        assert_eq!(holders, 1);
    }
}
