//! Topic handlers and the registry that routes to them.
//!
//! A handler receives the session it serves and the decoded payload. It may
//! reply immediately, spawn session-bound work, or schedule session-owned
//! timers. Handlers keep no state across sessions.

pub mod echo;
pub mod registry;
pub mod repeat;
pub mod sample_image;
pub mod upload;

pub use echo::EchoHandler;
pub use registry::HandlerRegistry;
pub use repeat::RepeatHandler;
pub use sample_image::SampleImageHandler;
pub use upload::UploadHandler;

use crate::session::Session;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`Handler::invoke`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A unit of logic bound to a topic.
pub trait Handler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle one message. The returned future must complete promptly;
    /// long-running work goes through [`Session::spawn`] or a session timer.
    fn invoke<'a>(&'a self, session: &'a Arc<Session>, payload: Payload) -> HandlerFuture<'a>;
}

/// What a handler receives: the envelope payload, or raw bytes for frames
/// that did not decode as an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    /// The payload as a string, if it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    /// Size in bytes: raw length for binary, UTF-8 length for strings,
    /// compact JSON length for anything else.
    pub fn byte_len(&self) -> usize {
        match self {
            Payload::Binary(b) => b.len(),
            Payload::Json(Value::String(s)) => s.len(),
            Payload::Json(v) => v.to_string().len(),
        }
    }
}

/// Strings render verbatim, other JSON compactly, binary as lossy UTF-8.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Json(Value::String(s)) => f.write_str(s),
            Payload::Json(v) => write!(f, "{v}"),
            Payload::Binary(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}
