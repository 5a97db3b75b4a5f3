//! `upload`: receives frames that are not topic envelopes.
//!
//! Nothing is stored; the handler acknowledges the size it received.

use super::{Handler, HandlerFuture, Payload};
use crate::session::Session;
use std::sync::Arc;
use tracing::info;

/// Acknowledges opaque data with `Upload received: {n} bytes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UploadHandler;

impl Handler for UploadHandler {
    fn name(&self) -> &'static str {
        "upload"
    }

    fn invoke<'a>(&'a self, session: &'a Arc<Session>, payload: Payload) -> HandlerFuture<'a> {
        Box::pin(async move {
            let bytes = payload.byte_len();
            info!(
                session_id = %session.id(),
                bytes,
                binary = payload.is_binary(),
                "upload received"
            );
            session.send(format!("Upload received: {bytes} bytes")).await;
        })
    }
}
