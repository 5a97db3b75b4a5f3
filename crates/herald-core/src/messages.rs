//! Wire types for the herald topic protocol.
//!
//! Text frames carry a JSON envelope `{ "topic": <string?>, "payload": <any> }`.
//! Binary frames are opaque. Outbound replies are either JSON envelopes
//! (status pushes), plain text, or raw binary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic used when an envelope carries no usable topic.
pub const DEFAULT_TOPIC: &str = "default";
/// Topic of the periodic server status push.
pub const STATUS_TOPIC: &str = "status";
/// Payload of the periodic server status push.
pub const STATUS_PAYLOAD: &str = "Server is running";
/// Bounded repeating reply.
pub const REPEAT_TOPIC: &str = "repeat";
/// Sample file download.
pub const GET_SAMPLE_IMAGE_TOPIC: &str = "getSampleImage";
/// Topic that receives frames which did not decode as an envelope.
pub const UPLOAD_TOPIC: &str = "upload";

/// A decoded topic message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Handler selector. Absent, `null`, empty, or non-string values all
    /// resolve to [`DEFAULT_TOPIC`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Value>,
    /// Handler-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            topic: Some(Value::String(topic.into())),
            payload: payload.into(),
        }
    }

    /// The `{"topic":"status","payload":"Server is running"}` push.
    pub fn status() -> Self {
        Self::new(STATUS_TOPIC, STATUS_PAYLOAD)
    }

    /// The topic this envelope routes to.
    pub fn topic(&self) -> &str {
        match &self.topic {
            Some(Value::String(t)) if !t.is_empty() => t,
            _ => DEFAULT_TOPIC,
        }
    }
}

/// One transport-level message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Raw bytes of the frame (UTF-8 for text frames).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(s) => s.as_bytes(),
            Frame::Binary(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Frame::Text(s) => s.into_bytes(),
            Frame::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Text(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(b: Vec<u8>) -> Self {
        Frame::Binary(b)
    }
}
