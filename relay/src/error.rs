//! Error types for the `relay` crate.

use std::error::Error as StdError;
use std::fmt;
use std::io;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: RelayErrorKind,
}

/// Major categories of errors in the relay.
#[derive(Debug, PartialEq)]
pub enum RelayErrorKind {
    /// The listener could not acquire its address. Fatal at startup.
    Bind(BindErrorKind),
    /// A read or write on a single connection failed.
    Transport,
    /// A peer broke framing badly enough that its connection is closed.
    Protocol,
    /// A peer stopped reading and its outgoing queue filled up.
    Backpressure,
}

#[derive(Debug, PartialEq)]
pub enum BindErrorKind {
    AddrInUse,
    Other,
}

impl Error {
    pub fn bind(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::AddrInUse => BindErrorKind::AddrInUse,
            _ => BindErrorKind::Other,
        };
        Error {
            source: Some(Box::new(err)),
            error_kind: RelayErrorKind::Bind(kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            RelayErrorKind::Bind(BindErrorKind::AddrInUse) => {
                write!(f, "Server address/port is already in use")
            }
            RelayErrorKind::Bind(BindErrorKind::Other) => write!(f, "Failed to bind listener"),
            RelayErrorKind::Transport => write!(f, "Transport error"),
            RelayErrorKind::Protocol => write!(f, "Protocol error"),
            RelayErrorKind::Backpressure => write!(f, "Peer is not reading"),
        }?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: RelayErrorKind::Transport,
        }
    }
}
