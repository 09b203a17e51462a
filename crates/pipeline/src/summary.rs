//! Per-run tallies, aggregated by the coordinating control flow only.

use serde::Serialize;
use spritebatch_core::item::Item;
use spritebatch_core::types::ItemId;

/// One item that did not get an output this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub id: ItemId,
    pub reason: String,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Items produced by the scanner (after any limit).
    pub discovered: usize,
    /// Items the cache reported as already done.
    pub skipped: usize,
    pub saved: usize,
    pub failed: usize,
    /// Physical requests issued (calls or submissions).
    pub remote_calls: usize,
    /// Async jobs still outstanding when the run stopped.
    pub left_pending: usize,
    pub failures: Vec<FailedItem>,
}

impl RunSummary {
    pub fn new(discovered: usize) -> Self {
        Self {
            discovered,
            ..Self::default()
        }
    }

    pub fn record_saved(&mut self) {
        self.saved += 1;
    }

    pub fn record_failure(&mut self, item: &Item, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(FailedItem {
            id: item.id.clone(),
            reason: reason.into(),
        });
    }

    /// Percentage of calls saved versus one call per item.
    pub fn cost_reduction_pct(&self) -> f64 {
        let items = self.discovered.max(1) as f64;
        100.0 * (1.0 - self.remote_calls as f64 / items)
    }

    /// Log the summary line plus one warning per failed item.
    pub fn log(&self) {
        for failure in &self.failures {
            tracing::warn!(item = %failure.id, reason = %failure.reason, "Item failed");
        }
        tracing::info!(
            discovered = self.discovered,
            skipped = self.skipped,
            saved = self.saved,
            failed = self.failed,
            remote_calls = self.remote_calls,
            left_pending = self.left_pending,
            cost_reduction_pct = %format!("{:.1}", self.cost_reduction_pct()),
            "Run complete",
        );
    }
}
