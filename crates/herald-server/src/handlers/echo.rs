//! Fallback handler: echoes the payload back.

use super::{Handler, HandlerFuture, Payload};
use crate::session::Session;
use std::sync::Arc;
use tracing::debug;

/// Replies `Received: {payload}` immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn name(&self) -> &'static str {
        "default"
    }

    fn invoke<'a>(&'a self, session: &'a Arc<Session>, payload: Payload) -> HandlerFuture<'a> {
        Box::pin(async move {
            let reply = format!("Received: {payload}");
            debug!(session_id = %session.id(), "echo handler invoked");
            session.send(reply).await;
        })
    }
}
