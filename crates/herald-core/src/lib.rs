//! herald-core: Shared protocol library for the herald topic server.
//!
//! Provides the JSON topic envelope, inbound/outbound frame types, the
//! frame codec that separates structured messages from opaque payloads,
//! and the common error type.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_frame, encode_json, Decoded};
pub use error::{HeraldError, HeraldResult};
pub use messages::{
    Envelope, Frame, DEFAULT_TOPIC, GET_SAMPLE_IMAGE_TOPIC, REPEAT_TOPIC, STATUS_PAYLOAD,
    STATUS_TOPIC, UPLOAD_TOPIC,
};
