//! Error types for the `events` crate.
//!
//! Follows the same pattern as the other crates in this workspace: a root
//! `Error` struct holding an error kind and an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: EventsErrorKind,
}

/// Major categories of errors in the `events` crate.
#[derive(Debug, PartialEq)]
pub enum EventsErrorKind {
    Decode(DecodeErrorKind),
    Encode,
    Payload(PayloadErrorKind),
}

/// Reasons a received frame could not be turned into an `Event`.
#[derive(Debug, PartialEq)]
pub enum DecodeErrorKind {
    Empty,
    InvalidUtf8,
    Malformed,
    NotAnObject,
    MissingType,
    InvalidFields,
}

/// Errors from opening an obfuscated chat payload.
#[derive(Debug, PartialEq)]
pub enum PayloadErrorKind {
    InvalidEncoding,
    InvalidUtf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            EventsErrorKind::Decode(kind) => write!(f, "Decode error: {kind:?}"),
            EventsErrorKind::Encode => write!(f, "Encode error"),
            EventsErrorKind::Payload(kind) => write!(f, "Payload error: {kind:?}"),
        }?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
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

/// Helper function to create decode errors.
pub fn decode_error(
    kind: DecodeErrorKind,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: EventsErrorKind::Decode(kind),
    }
}

/// Helper function to create payload errors.
pub fn payload_error(
    kind: PayloadErrorKind,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> Error {
    Error {
        source: Some(source.into()),
        error_kind: EventsErrorKind::Payload(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_source() {
        let err = decode_error(DecodeErrorKind::MissingType, "no type field");
        let rendered = err.to_string();
        assert!(rendered.contains("MissingType"));
        assert!(rendered.contains("no type field"));
    }

    #[test]
    fn test_helpers_set_error_kind() {
        assert_eq!(
            decode_error(DecodeErrorKind::Empty, "empty").error_kind,
            EventsErrorKind::Decode(DecodeErrorKind::Empty)
        );
        assert_eq!(
            payload_error(PayloadErrorKind::InvalidUtf8, "bad").error_kind,
            EventsErrorKind::Payload(PayloadErrorKind::InvalidUtf8)
        );
    }
}
