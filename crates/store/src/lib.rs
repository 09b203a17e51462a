//! Durable state for the sprite batch pipeline.
//!
//! Two records outlive a run: the content cache index and the set of
//! pending asynchronous jobs. Both are single JSON documents rewritten
//! in full on every mutation through [`record::write_json_atomic`], so a
//! crash mid-write leaves the previous version in place. Generated
//! outputs go through the [`storage::Storage`] trait.

pub mod cache;
pub mod error;
pub mod pending;
pub mod record;
pub mod storage;

pub use cache::{CacheRecord, ContentCache};
pub use error::StoreError;
pub use pending::{PendingJob, PendingJobStore};
pub use storage::{FsStorage, OutputRule, Storage};
