//! Wire events for the Flexare chat relay.
//!
//! This crate is shared by the relay server and the terminal client. It has
//! no dependencies on other workspace crates.
//!
//! # Modules
//!
//! - `codec`: newline-delimited JSON framing (`encode` / `decode`)
//! - `error`: error kinds for decoding, encoding and payload handling
//! - `payload`: optional client-side obfuscation of chat `data`
//!
//! # Wire format
//!
//! Each event is a single JSON object on its own line, discriminated by a
//! `type` field:
//!
//! ```text
//! {"type":"connect","username":"alice"}
//! {"type":"chat","username":"alice","data":"hi"}
//! {"type":"changeUsername","username":"alice","newUsername":"carol"}
//! ```
//!
//! Objects whose `type` is not one of the known tags decode to
//! [`Event::Unknown`] and are relayed unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod codec;
pub mod error;
pub mod payload;

pub use codec::{decode, encode};

/// A display name chosen by a client. Compared as an exact, case-sensitive string.
pub type DisplayName = String;

/// Wire tags for every event this crate knows how to type.
pub const KNOWN_TYPES: [&str; 6] = [
    "connect",
    "changeUsername",
    "chat",
    "disconnect",
    "bad-connect-username",
    "bad-username",
];

/// Trait for getting the wire `type` tag of an event
pub trait EventType {
    fn event_type(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // Handshake and presence
    #[serde(rename = "connect")]
    Connect {
        #[serde(rename = "username")]
        display_name: DisplayName,
    },
    #[serde(rename = "disconnect")]
    Disconnect {
        #[serde(rename = "username")]
        display_name: DisplayName,
    },

    // Identity changes. The relay resolves the current name itself, so the
    // claimed `username` may be omitted by clients.
    #[serde(rename = "changeUsername")]
    RenameRequest {
        #[serde(rename = "username", default)]
        display_name: DisplayName,
        #[serde(rename = "newUsername")]
        new_display_name: DisplayName,
    },

    #[serde(rename = "chat")]
    Chat {
        #[serde(rename = "username", default)]
        display_name: DisplayName,
        data: String,
    },

    // Rejections, only ever sent to the originating connection
    #[serde(rename = "bad-connect-username")]
    ConnectRejected {
        #[serde(rename = "username")]
        display_name: DisplayName,
    },
    #[serde(rename = "bad-username")]
    RenameRejected {
        #[serde(rename = "username")]
        conflicting_name: DisplayName,
    },

    /// Any other well-formed event. Produced only by `codec::decode`.
    #[serde(skip)]
    Unknown(UnknownEvent),
}

impl Event {
    pub fn is_known_type(tag: &str) -> bool {
        KNOWN_TYPES.contains(&tag)
    }
}

impl EventType for Event {
    fn event_type(&self) -> &str {
        match self {
            Event::Connect { .. } => "connect",
            Event::Disconnect { .. } => "disconnect",
            Event::RenameRequest { .. } => "changeUsername",
            Event::Chat { .. } => "chat",
            Event::ConnectRejected { .. } => "bad-connect-username",
            Event::RenameRejected { .. } => "bad-username",
            Event::Unknown(unknown) => unknown.kind(),
        }
    }
}

/// An event with an unrecognised `type`, kept verbatim for forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEvent {
    kind: String,
    body: Map<String, Value>,
}

impl UnknownEvent {
    /// Wraps a JSON object whose `type` field holds `kind`.
    pub fn new(kind: String, body: Map<String, Value>) -> Self {
        Self { kind, body }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The full object as received, including the `type` field.
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}
