//! Newline-delimited JSON framing for `Event`s.
//!
//! One event per line. `serde_json` escapes control characters inside
//! strings, so an encoded event never contains a raw `\n` before its
//! terminator.

use crate::error::{decode_error, DecodeErrorKind, Error, EventsErrorKind};
use crate::{Event, UnknownEvent};
use serde_json::Value;

/// Byte that terminates every encoded frame.
pub const DELIMITER: u8 = b'\n';

/// Largest frame a reader accepts, excluding the terminator.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Encode an event as a single `\n` terminated line.
pub fn encode(event: &Event) -> Result<String, Error> {
    let encoded = match event {
        Event::Unknown(unknown) => serde_json::to_string(unknown.body()),
        known => serde_json::to_string(known),
    };

    let mut line = encoded.map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: EventsErrorKind::Encode,
    })?;
    line.push(DELIMITER as char);
    Ok(line)
}

/// Decode one frame. A trailing `\n` or `\r\n` is accepted and ignored.
pub fn decode(frame: &[u8]) -> Result<Event, Error> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| decode_error(DecodeErrorKind::InvalidUtf8, e))?;
    let text = text.trim_end_matches(['\n', '\r']);
    if text.trim().is_empty() {
        return Err(decode_error(DecodeErrorKind::Empty, "empty frame"));
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| decode_error(DecodeErrorKind::Malformed, e))?;
    let Value::Object(body) = value else {
        return Err(decode_error(
            DecodeErrorKind::NotAnObject,
            "frame is not a JSON object",
        ));
    };

    let kind = match body.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => {
            return Err(decode_error(
                DecodeErrorKind::MissingType,
                "frame has no string `type` field",
            ))
        }
    };

    if Event::is_known_type(&kind) {
        serde_json::from_value(Value::Object(body))
            .map_err(|e| decode_error(DecodeErrorKind::InvalidFields, e))
    } else {
        Ok(Event::Unknown(UnknownEvent::new(kind, body)))
    }
}
