//! JSONL audit sink for `studyforge`.
//!
//! Appends one JSON object per generation event to a file. Each line carries the
//! fields of [`event_to_json`] plus a `recorded_at` RFC 3339 timestamp, so failed
//! refunds (`"event": "refund_failed"`) can be reconciled from the log alone.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use studyforge::telemetry::{event_to_json, GenerationEvent, TelemetrySink};
use tokio::io::AsyncWriteExt;

/// Appends events to a file, one JSON object per line.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: Arc<PathBuf>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: Arc::new(path.into()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One log line for `event`, without the trailing newline.
pub fn render_line(event: &GenerationEvent) -> String {
    let mut value = event_to_json(event);
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "recorded_at".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    value.to_string()
}

impl tower_service::Service<GenerationEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GenerationEvent) -> Self::Future {
        let path = Arc::clone(&self.path);
        let mut line = render_line(&event);
        line.push('\n');
        Box::pin(async move {
            let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path.as_path()).await?;
            if let Err(e) = file.write_all(line.as_bytes()).await {
                tracing::warn!(target: "studyforge::telemetry", path = %path.display(), error = %e, "failed to append audit line");
                return Err(e);
            }
            file.flush().await
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}
