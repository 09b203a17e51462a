//! The seam between the engine and a concrete generation mode.

use std::sync::Arc;

use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::{RemoteOutput, RemoteRequest};

use crate::error::PipelineError;

/// One generation mode: how a unit becomes a request and how the
/// provider's answer becomes per-item outputs.
pub trait GenerationTask: Send + Sync {
    /// Mode name for logs.
    fn name(&self) -> &'static str;

    /// Build the single request for `unit`.
    fn build_request(&self, unit: &WorkUnit) -> Result<RemoteRequest, PipelineError>;

    /// Split the provider output into one output per item, in
    /// `unit.items()` order. Any error fails the whole unit.
    fn split(&self, unit: &WorkUnit, output: RemoteOutput) -> Result<Vec<Vec<u8>>, PipelineError>;
}

/// [`GenerationTask::build_request`] on the blocking pool. Reading and
/// composing images must not stall the calls sharing the runtime.
pub async fn build_request_blocking(
    task: Arc<dyn GenerationTask>,
    unit: WorkUnit,
) -> Result<RemoteRequest, PipelineError> {
    tokio::task::spawn_blocking(move || task.build_request(&unit)).await?
}

/// [`GenerationTask::split`] on the blocking pool.
pub async fn split_blocking(
    task: Arc<dyn GenerationTask>,
    unit: WorkUnit,
    output: RemoteOutput,
) -> Result<Vec<Vec<u8>>, PipelineError> {
    tokio::task::spawn_blocking(move || task.split(&unit, output)).await?
}
