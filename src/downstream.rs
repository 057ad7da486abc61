//! Outbound events for work that follows a reconciliation

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Request to regenerate documentation for changed files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamEvent {
    pub job: String,
    pub repository_id: i64,
    pub doc_type: String,
    /// Added or modified paths, sorted
    pub changed_paths: Vec<String>,
}

impl DownstreamEvent {
    pub fn generate_docs(repository_id: i64, changed_paths: Vec<String>) -> Self {
        Self {
            job: "generate_docs".to_string(),
            repository_id,
            doc_type: "api".to_string(),
            changed_paths,
        }
    }
}

/// Fire-and-forget delivery; `schedule` never blocks and never fails
pub trait DownstreamScheduler: Send + Sync {
    fn schedule(&self, event: DownstreamEvent);
}

/// Hands events to an in-process consumer
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<DownstreamEvent>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownstreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DownstreamScheduler for ChannelScheduler {
    fn schedule(&self, event: DownstreamEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(
                repository_id = e.0.repository_id,
                "Downstream consumer gone, dropping event"
            );
        }
    }
}

/// Records events in the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScheduler;

impl DownstreamScheduler for LogScheduler {
    fn schedule(&self, event: DownstreamEvent) {
        info!(
            job = %event.job,
            repository_id = event.repository_id,
            doc_type = %event.doc_type,
            paths = event.changed_paths.len(),
            "Scheduled downstream job"
        );
    }
}
