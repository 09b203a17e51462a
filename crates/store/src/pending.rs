//! Persisted set of submitted-but-unresolved remote jobs.
//!
//! The set is one JSON array rewritten in full on every add or remove,
//! so a restarted process reloads exactly the jobs still outstanding
//! and can resume polling them instead of resubmitting.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use spritebatch_core::types::{ItemId, Timestamp};
use spritebatch_core::unit::WorkUnit;

use crate::error::StoreError;
use crate::record::{read_json_or_default, write_json_atomic};

/// One asynchronous remote job awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJob {
    /// Handle passed to `poll`.
    pub status_handle: String,
    /// Handle passed to `fetch` once the job completes.
    pub result_handle: String,
    /// The batch or item the job was submitted for.
    pub unit: WorkUnit,
    pub submitted_at: Timestamp,
}

impl PendingJob {
    pub fn new(status_handle: String, result_handle: String, unit: WorkUnit) -> Self {
        Self {
            status_handle,
            result_handle,
            unit,
            submitted_at: Utc::now(),
        }
    }

    /// Time since submission, zero if the clock went backwards.
    pub fn elapsed(&self, now: Timestamp) -> std::time::Duration {
        (now - self.submitted_at).to_std().unwrap_or_default()
    }

    /// Identities of every item covered by the job.
    pub fn item_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.unit.items().iter().map(|item| &item.id)
    }
}

/// Durable home of the pending-job set.
#[derive(Debug, Clone)]
pub struct PendingJobStore {
    path: PathBuf,
}

impl PendingJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted set. A missing or corrupt record is empty.
    pub fn load(&self) -> Vec<PendingJob> {
        read_json_or_default(&self.path)
    }

    /// Replace the persisted set with `jobs`.
    pub fn save(&self, jobs: &[PendingJob]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, jobs)
    }
}
