//! `getSampleImage`: streams a file from the sample directory.
//!
//! The requested name must be a relative path made only of normal components,
//! and its canonical form must stay inside the canonical sample directory, so
//! neither `..` segments nor symlinks can reach files outside it.

use super::{Handler, HandlerFuture, Payload};
use crate::session::Session;
use herald_core::{Frame, HeraldError, HeraldResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Reply sent when the image cannot be served for any reason.
pub const IMAGE_NOT_FOUND: &str = "Error: Image not found";

/// Reads a file from `root` and sends it as one binary frame.
#[derive(Debug, Clone)]
pub struct SampleImageHandler {
    root: PathBuf,
}

impl SampleImageHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Join `name` onto `root`, rejecting anything but plain relative components.
fn contained_path(root: &Path, name: &str) -> HeraldResult<PathBuf> {
    let requested = Path::new(name);
    let mut components = requested.components().peekable();
    if components.peek().is_none() {
        return Err(HeraldError::InvalidMessage("empty image name".into()));
    }
    if !components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(HeraldError::InvalidMessage(format!(
            "image name escapes sample directory: {name}"
        )));
    }
    Ok(root.join(requested))
}

/// Read a sample file after resolving symlinks and re-checking containment.
async fn load(root: &Path, name: &str) -> HeraldResult<Vec<u8>> {
    let candidate = contained_path(root, name)?;
    let root = tokio::fs::canonicalize(root).await?;
    let resolved = tokio::fs::canonicalize(&candidate).await?;
    if !resolved.starts_with(&root) {
        return Err(HeraldError::InvalidMessage(format!(
            "image resolves outside sample directory: {name}"
        )));
    }
    Ok(tokio::fs::read(&resolved).await?)
}

impl Handler for SampleImageHandler {
    fn name(&self) -> &'static str {
        "getSampleImage"
    }

    fn invoke<'a>(&'a self, session: &'a Arc<Session>, payload: Payload) -> HandlerFuture<'a> {
        let root = self.root.clone();
        let task_session = Arc::clone(session);

        session.spawn(async move {
            let session_id = task_session.id().to_string();
            let result = match payload.as_str() {
                Some(name) => load(&root, name).await.map(|data| (name.to_string(), data)),
                None => Err(HeraldError::InvalidMessage(
                    "image name must be a string".into(),
                )),
            };

            match result {
                Ok((name, data)) => {
                    info!(session_id = %session_id, image = %name, bytes = data.len(), "sending image");
                    task_session.send(Frame::Binary(data)).await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to read image");
                    task_session.send(IMAGE_NOT_FOUND).await;
                }
            }
        });

        Box::pin(std::future::ready(()))
    }
}
