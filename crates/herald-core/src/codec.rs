//! JSON envelope codec.
//!
//! Any frame whose bytes are well-formed UTF-8 JSON decodes to an
//! [`Envelope`], regardless of whether it arrived as a text or binary frame.
//! Objects supply their own `topic` and `payload`; other non-null values carry
//! neither, so they route to the default topic with a `null` payload. Invalid
//! UTF-8, malformed JSON and a bare `null` are kept as opaque bytes for the
//! upload path.

use crate::error::HeraldResult;
use crate::messages::{Envelope, Frame};
use serde_json::Value;

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed topic envelope.
    Message(Envelope),
    /// Bytes that are not an envelope.
    Opaque(Vec<u8>),
}

/// Classify an inbound frame.
pub fn decode_frame(frame: Frame) -> Decoded {
    match serde_json::from_slice::<Value>(frame.as_bytes()) {
        Ok(value @ Value::Object(_)) => match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => Decoded::Message(envelope),
            Err(_) => Decoded::Opaque(frame.into_bytes()),
        },
        Ok(Value::Null) | Err(_) => Decoded::Opaque(frame.into_bytes()),
        Ok(_) => Decoded::Message(Envelope {
            topic: None,
            payload: Value::Null,
        }),
    }
}

/// Serialize a value into a text frame.
pub fn encode_json<T: serde::Serialize>(value: &T) -> HeraldResult<Frame> {
    Ok(Frame::Text(serde_json::to_string(value)?))
}
