//! `repeat`: sends the payload back a fixed number of times on a timer.

use super::{Handler, HandlerFuture, Payload};
use crate::config::Timing;
use crate::session::Session;
use herald_core::Frame;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Sends `Message {n}: {payload}` once per interval, `count` times.
#[derive(Debug, Clone, Copy)]
pub struct RepeatHandler {
    interval: Duration,
    count: u32,
}

impl RepeatHandler {
    pub fn new(interval: Duration, count: u32) -> Self {
        Self { interval, count }
    }
}

impl From<&Timing> for RepeatHandler {
    fn from(t: &Timing) -> Self {
        Self::new(t.repeat_interval, t.repeat_count)
    }
}

impl Handler for RepeatHandler {
    fn name(&self) -> &'static str {
        "repeat"
    }

    fn invoke<'a>(&'a self, session: &'a Arc<Session>, payload: Payload) -> HandlerFuture<'a> {
        let text = payload.to_string();
        let session_id = session.id().to_string();
        let render = Box::new(move |n: u32| {
            trace!(session_id = %session_id, n, "repeat firing");
            Frame::Text(format!("Message {n}: {text}"))
        });

        match session.schedule_repeating("repeat", self.interval, Some(self.count), render) {
            Some(timer_id) => {
                debug!(session_id = %session.id(), timer_id, count = self.count, "repeat scheduled")
            }
            None => debug!(session_id = %session.id(), "repeat not scheduled"),
        }

        Box::pin(std::future::ready(()))
    }
}
