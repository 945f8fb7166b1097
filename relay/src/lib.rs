//! Connection registry and broadcast engine for the Flexare chat relay.
//!
//! # Architecture
//!
//! - **Unique display names**: every connection may hold one display name,
//!   claimed with a `connect` handshake. Names are unique across all live
//!   connections (exact, case-sensitive match).
//! - **Dual-index registry**: `ConnectionRegistry` keeps live connections in
//!   one DashMap and a name -> connection index in another. Name checks and
//!   claims happen under the index entry lock, so two connections can never
//!   both win the same name.
//! - **Direct and Broadcast scopes**: the handler tags each outgoing event as
//!   a reply to the sender or a broadcast that excludes a set of connections.
//! - **Queued writes**: the `Manager` encodes an event once and pushes the
//!   shared frame onto each recipient's queue. A per-connection writer task
//!   drains the queue, so no lock is ever held across a socket write. Queues
//!   are bounded; a connection whose queue fills up is closed.
//! - **Ephemeral state**: nothing is persisted. A connection's name is
//!   released the moment it closes.
//!
//! # Message Flow
//!
//! 1. `Server` accepts a socket and attaches it to the registry
//! 2. The reader task decodes one JSON line into an `events::Event`
//! 3. `ConnectionHandler` checks it against the registry and returns at most
//!    one `Message`
//! 4. `Manager::send_message` encodes the event and routes it by scope
//! 5. On EOF, transport error, explicit `disconnect` or shutdown, the handler
//!    unregisters the name and a `disconnect` is broadcast to everyone else
//!
//! # Example: running a relay
//!
//! ```rust,no_run
//! use relay::{Manager, Server};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), relay::error::Error> {
//! let server = Server::bind("0.0.0.0:3333", Arc::new(Manager::new())).await?;
//! server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry with dual-index architecture and type-safe ConnectionId
//! - `error`: relay error kinds
//! - `handler`: per-connection protocol state machine
//! - `manager`: encoding and scope-based routing (delegates to ConnectionRegistry)
//! - `message`: outgoing message and scope definitions
//! - `server`: TCP listener, per-connection reader/writer tasks, graceful shutdown

pub mod connection;
pub mod error;
pub mod handler;
pub mod manager;
pub mod message;
pub mod server;

pub use manager::Manager;
pub use server::Server;
