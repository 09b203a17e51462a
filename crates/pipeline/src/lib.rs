//! The sprite batch pipeline.
//!
//! Scanners produce items, the [`engine::Coordinator`] filters, packs
//! and dispatches them, and a [`task::GenerationTask`] decides what each
//! request looks like and how its answer is split back into per-item
//! outputs. Inline providers run through the [`dispatcher::Dispatcher`];
//! submit/poll providers run through the resumable
//! [`job_queue::JobQueue`].

pub mod describe;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod generate;
pub mod job_queue;
pub mod scanner;
pub mod sizes;
pub mod summary;
pub mod task;

pub use engine::{Coordinator, Plan, RunOptions};
pub use error::PipelineError;
pub use summary::RunSummary;
