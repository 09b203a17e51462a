use std::time::Duration;

use spritebatch_core::error::CoreError;
use spritebatch_remote::RemoteError;
use spritebatch_store::StoreError;

const SUMMARY_WIDTH: usize = 160;

/// Errors raised while building, dispatching or demultiplexing a unit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The provider answered, but not in the shape the task expects.
    #[error("Unexpected response: {0}")]
    Response(String),

    /// An asynchronous job ended in failure on the provider side.
    #[error("Remote job failed: {0}")]
    JobFailed(String),

    /// An asynchronous job did not finish within the maximum wait.
    #[error("Remote job gave no result within {}s", .0.as_secs())]
    JobTimedOut(Duration),

    /// The job queue is at its outstanding bound.
    #[error("Job queue full ({0} outstanding)")]
    QueueFull(usize),

    /// Local input for a unit could not be prepared.
    #[error("Invalid input {item}: {reason}")]
    Input { item: String, reason: String },

    /// Work handed to the blocking pool panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Short single-line form for the run summary.
    pub fn summary(&self) -> String {
        let text = self.to_string();
        let first = text.lines().next().unwrap_or_default();
        match first.char_indices().nth(SUMMARY_WIDTH) {
            Some((idx, _)) => format!("{}...", &first[..idx]),
            None => first.to_string(),
        }
    }
}
