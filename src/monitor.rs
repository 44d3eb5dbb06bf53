//! Progress events emitted by the batch fetcher and the sinks that consume them.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Started { expected_size: Option<u64> },
    Progress { bytes: u64 },
    Done { bytes: u64, skipped: bool },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: String,
    pub title: String,
    pub phase: Phase,
}

/// Receives lifecycle events from concurrently running workers.
///
/// Implementations must be cheap and must not fail: `observe` is called from
/// inside transfers and has no way to report an error back.
pub trait Monitor: Send + Sync {
    fn observe(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn observe(&self, _event: &ProgressEvent) {}
}

#[derive(Debug, Default)]
struct TaskProgress {
    expected_size: Option<u64>,
    last_decile: u64,
}

/// Writes events to `tracing`, logging transfer progress once per 10 % step.
#[derive(Debug, Default)]
pub struct LogMonitor {
    tasks: Mutex<HashMap<String, TaskProgress>>,
}

impl LogMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new decile when `bytes` crossed into one, `None` otherwise.
    fn advance(&self, task_id: &str, bytes: u64) -> Option<u64> {
        // Poisoned locks are recovered
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let progress = tasks.get_mut(task_id)?;
        let total = progress.expected_size.filter(|total| *total > 0)?;
        let decile = (bytes.min(total) * 10) / total;
        if decile > progress.last_decile {
            progress.last_decile = decile;
            return Some(decile);
        }
        None
    }
}

impl Monitor for LogMonitor {
    fn observe(&self, event: &ProgressEvent) {
        let task_id = event.task_id.as_str();
        match &event.phase {
            Phase::Started { expected_size } => {
                self.tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(
                        task_id.to_string(),
                        TaskProgress {
                            expected_size: *expected_size,
                            last_decile: 0,
                        },
                    );
                debug!(task_id, title = %event.title, ?expected_size, "Started");
            }
            Phase::Progress { bytes } => {
                if let Some(decile) = self.advance(task_id, *bytes) {
                    info!(title = %event.title, bytes, "Downloaded {}%", decile * 10);
                }
            }
            Phase::Done { bytes, skipped } => {
                self.tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(task_id);
                if *skipped {
                    info!(title = %event.title, bytes, "Already downloaded, skipping");
                } else {
                    info!(title = %event.title, bytes, "Download complete");
                }
            }
            Phase::Failed { error } => {
                self.tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(task_id);
                warn!(task_id, title = %event.title, %error, "Download failed");
            }
        }
    }
}
