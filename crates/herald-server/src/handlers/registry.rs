//! Topic -> handler table with a fallback.
//!
//! Built once at startup and then shared behind an `Arc`; lookups take no
//! locks.

use super::{EchoHandler, Handler, RepeatHandler, SampleImageHandler, UploadHandler};
use crate::config::Timing;
use herald_core::{DEFAULT_TOPIC, GET_SAMPLE_IMAGE_TOPIC, REPEAT_TOPIC, UPLOAD_TOPIC};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Maps topic names to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    fallback: Arc<dyn Handler>,
}

impl HandlerRegistry {
    /// An empty registry that routes everything to `fallback`.
    pub fn new(fallback: Arc<dyn Handler>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
        }
    }

    /// The built-in handler set: `default`, `repeat`, `getSampleImage`, `upload`.
    pub fn with_builtins(sample_dir: impl Into<PathBuf>, timing: &Timing) -> Self {
        let echo: Arc<dyn Handler> = Arc::new(EchoHandler);
        let mut registry = Self::new(Arc::clone(&echo));
        registry.register(DEFAULT_TOPIC, echo);
        registry.register(REPEAT_TOPIC, Arc::new(RepeatHandler::from(timing)));
        registry.register(
            GET_SAMPLE_IMAGE_TOPIC,
            Arc::new(SampleImageHandler::new(sample_dir)),
        );
        registry.register(UPLOAD_TOPIC, Arc::new(UploadHandler));
        registry
    }

    /// Register `handler` for an exact topic, returning any handler it replaces.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        self.handlers.insert(topic.into(), handler)
    }

    /// Handler for `topic`, or the fallback when none is registered.
    pub fn resolve(&self, topic: &str) -> &Arc<dyn Handler> {
        self.handlers.get(topic).unwrap_or(&self.fallback)
    }

    #[cfg(test)]
    pub fn is_registered(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// Registered topic names, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}
