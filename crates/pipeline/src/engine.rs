//! Run coordination.
//!
//! The [`Coordinator`] is the single control flow of a run. It filters
//! scanned items through the [`ContentCache`], classifies and packs
//! them, hands units to the [`Dispatcher`] (inline providers) or the
//! [`JobQueue`] (asynchronous providers), and applies every outcome as
//! it arrives: outputs are written first and the cache is updated only
//! afterwards. Concurrent calls never touch the cache or the summary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use spritebatch_core::classify::{classify, Partition};
use spritebatch_core::grid::Batch;
use spritebatch_core::item::Item;
use spritebatch_core::settings::BatchSettings;
use spritebatch_core::types::ItemId;
use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::{RemoteClient, RemoteOutput, RemoteRequest};
use spritebatch_store::ContentCache;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, UnitOutcome};
use crate::error::PipelineError;
use crate::job_queue::{JobQueue, QueueEvent, QueueHandler, Resolution, ResolvedJob};
use crate::summary::RunSummary;
use crate::task::{build_request_blocking, split_blocking, GenerationTask};

/// Caps applied to a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Keep only the first N scanned items.
    pub limit: Option<usize>,
    /// Keep at most N batches (across all size groups).
    pub max_batches: Option<usize>,
    /// Keep at most N individual items.
    pub max_singles: Option<usize>,
}

impl RunOptions {
    /// Options for a smoke run.
    pub fn smoke(max_batches: usize, max_singles: usize) -> Self {
        Self {
            max_batches: Some(max_batches),
            max_singles: Some(max_singles),
            ..Self::default()
        }
    }
}

/// Work for one run: batches per size group, then individual items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub groups: Vec<Vec<Batch>>,
    pub singles: Vec<Item>,
}

impl Plan {
    pub fn batch_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Number of remote requests the plan needs.
    pub fn unit_count(&self) -> usize {
        self.batch_count() + self.singles.len()
    }

    /// Every unit, batches first in group order.
    pub fn into_units(self) -> Vec<WorkUnit> {
        self.groups
            .into_iter()
            .flatten()
            .map(WorkUnit::Batch)
            .chain(self.singles.into_iter().map(WorkUnit::Single))
            .collect()
    }
}

/// Drives one run for one generation task.
pub struct Coordinator {
    settings: BatchSettings,
    cache: ContentCache,
    task: Arc<dyn GenerationTask>,
    options: RunOptions,
}

impl Coordinator {
    pub fn new(
        settings: BatchSettings,
        cache: ContentCache,
        task: Arc<dyn GenerationTask>,
        options: RunOptions,
    ) -> Self {
        Self {
            settings,
            cache,
            task,
            options,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Filter `items` through the cache, then classify and pack them.
    pub fn plan(&self, items: Vec<Item>, summary: &mut RunSummary) -> Plan {
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            if self.cache.needs_work(&item) {
                candidates.push(item);
            } else {
                tracing::debug!(item = %item.id, "Up to date; skipping");
                summary.skipped += 1;
            }
        }

        let Partition { small, large } = classify(candidates, self.settings.size_threshold);
        tracing::info!(
            small = small.len(),
            large = large.len(),
            threshold = self.settings.size_threshold,
            "Items classified",
        );

        let mut groups = self.settings.packer().pack_by_size(small);
        let mut singles = large;

        if let Some(max) = self.options.max_batches {
            let mut remaining = max;
            for group in &mut groups {
                let keep = remaining.min(group.len());
                group.truncate(keep);
                remaining -= keep;
            }
            groups.retain(|group| !group.is_empty());
        }
        if let Some(max) = self.options.max_singles {
            singles.truncate(max);
        }

        Plan { groups, singles }
    }

    fn prepare(&self, mut items: Vec<Item>, in_flight: &HashSet<ItemId>) -> (Plan, RunSummary) {
        if let Some(limit) = self.options.limit {
            items.truncate(limit);
        }
        let mut summary = RunSummary::new(items.len());
        items.retain(|item| !in_flight.contains(&item.id));

        let plan = self.plan(items, &mut summary);
        tracing::info!(
            task = self.task.name(),
            discovered = summary.discovered,
            skipped = summary.skipped,
            size_groups = plan.groups.len(),
            batches = plan.batch_count(),
            singles = plan.singles.len(),
            "Run planned",
        );
        (plan, summary)
    }

    /// Run against an inline provider.
    ///
    /// Size groups are dispatched one after another, each group's
    /// outcomes applied before the next group starts; individual items
    /// go last.
    pub async fn run_sync(&mut self, client: Arc<dyn RemoteClient>, items: Vec<Item>) -> RunSummary {
        let (plan, mut summary) = self.prepare(items, &HashSet::new());
        let dispatcher = Dispatcher::from_settings(&self.settings);
        let group_count = plan.groups.len();

        for (index, group) in plan.groups.into_iter().enumerate() {
            if let Some(first) = group.first() {
                let (width, height) = first.cell_size();
                tracing::info!(
                    group = index + 1,
                    of = group_count,
                    batches = group.len(),
                    cell = %format!("{width}x{height}"),
                    "Dispatching size group",
                );
            }
            let units = group.into_iter().map(WorkUnit::Batch).collect();
            self.dispatch(&dispatcher, &client, units, &mut summary).await;
        }

        if !plan.singles.is_empty() {
            tracing::info!(count = plan.singles.len(), "Dispatching individual items");
            let units = plan.singles.into_iter().map(WorkUnit::Single).collect();
            self.dispatch(&dispatcher, &client, units, &mut summary).await;
        }

        summary
    }

    /// Run against an asynchronous provider through `queue`.
    ///
    /// Items already covered by jobs the queue resumed are left to those
    /// jobs rather than submitted again.
    pub async fn run_async(
        &mut self,
        queue: &mut JobQueue,
        items: Vec<Item>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let in_flight: HashSet<ItemId> = queue
            .jobs()
            .iter()
            .flat_map(|job| job.item_ids().cloned())
            .collect();
        let (plan, mut summary) = self.prepare(items, &in_flight);
        let units = plan.into_units();
        summary.remote_calls += units.len();

        let max_wait = queue.settings().max_wait;
        let mut sink = QueueSink {
            coordinator: self,
            summary: &mut summary,
            max_wait,
        };
        let left = queue.run(units, &mut sink, cancel).await;

        summary.left_pending = left;
        summary
    }

    async fn dispatch(
        &mut self,
        dispatcher: &Dispatcher,
        client: &Arc<dyn RemoteClient>,
        units: Vec<WorkUnit>,
        summary: &mut RunSummary,
    ) {
        summary.remote_calls += units.len();
        let task = self.task.clone();
        let client = client.clone();

        let outcomes = dispatcher.stream(units, move |unit| {
            let task = task.clone();
            let client = client.clone();
            async move {
                let request = build_request_blocking(task.clone(), unit.clone()).await?;
                let output = client.invoke(&request).await?;
                split_blocking(task, unit, output).await
            }
        });
        let mut outcomes = std::pin::pin!(outcomes);

        while let Some(UnitOutcome { unit, result }) = outcomes.next().await {
            self.apply(&unit, result, summary);
        }
    }

    /// Split a provider result and apply it.
    async fn finish(
        &mut self,
        unit: WorkUnit,
        result: Result<RemoteOutput, PipelineError>,
        summary: &mut RunSummary,
    ) {
        let outputs = match result {
            Ok(output) => split_blocking(self.task.clone(), unit.clone(), output).await,
            Err(e) => Err(e),
        };
        self.apply(&unit, outputs, summary);
    }

    /// Apply one unit's per-item outputs. A unit-level error fails every
    /// item in the unit and writes nothing.
    fn apply(
        &mut self,
        unit: &WorkUnit,
        outputs: Result<Vec<Vec<u8>>, PipelineError>,
        summary: &mut RunSummary,
    ) {
        match outputs {
            Ok(outputs) => {
                let mut outputs = outputs.into_iter();
                for item in unit.items() {
                    match outputs.next() {
                        Some(bytes) => self.save(item, &bytes, summary),
                        None => summary.record_failure(item, "no output produced for item"),
                    }
                }
                tracing::info!(unit = %unit.label(), "Unit completed");
            }
            Err(error) => {
                tracing::warn!(
                    unit = %unit.label(),
                    items = unit.items().len(),
                    error = %error,
                    "Unit failed",
                );
                let reason = error.summary();
                for item in unit.items() {
                    summary.record_failure(item, reason.clone());
                }
            }
        }
    }

    /// Write one output, then record it in the cache if the source is
    /// still the one the output was made from.
    fn save(&mut self, item: &Item, bytes: &[u8], summary: &mut RunSummary) {
        let storage = self.cache.storage().clone();
        if let Err(e) = storage.write_output(item, bytes) {
            tracing::warn!(item = %item.id, error = %e, "Failed to write output");
            summary.record_failure(item, e.to_string());
            return;
        }
        summary.record_saved();

        match storage.read_fingerprint(item) {
            Ok(current) if current == item.fingerprint => {
                if let Err(e) = self.cache.mark_done(item) {
                    tracing::warn!(item = %item.id, error = %e, "Output saved but cache not updated");
                }
            }
            Ok(_) => tracing::warn!(
                item = %item.id,
                "Source changed during the run; it will be processed again next run",
            ),
            Err(e) => tracing::warn!(
                item = %item.id,
                error = %e,
                "Could not re-read source fingerprint; cache not updated",
            ),
        }
    }
}

/// Connects a [`JobQueue`] run to its coordinator.
struct QueueSink<'a> {
    coordinator: &'a mut Coordinator,
    summary: &'a mut RunSummary,
    max_wait: Duration,
}

#[async_trait]
impl<'a> QueueHandler for QueueSink<'a> {
    async fn request(&mut self, unit: &WorkUnit) -> Result<RemoteRequest, PipelineError> {
        build_request_blocking(self.coordinator.task.clone(), unit.clone()).await
    }

    async fn on_event(&mut self, event: QueueEvent) {
        let (unit, result) = match event {
            QueueEvent::Resolved(ResolvedJob { job, resolution }) => {
                let result = match resolution {
                    Resolution::Completed(bytes) => Ok(RemoteOutput::Image(bytes)),
                    Resolution::Failed(reason) => Err(PipelineError::JobFailed(reason)),
                    Resolution::TimedOut => Err(PipelineError::JobTimedOut(self.max_wait)),
                };
                (job.unit, result)
            }
            QueueEvent::SubmitFailed { unit, error } => (unit, Err(error)),
        };
        self.coordinator.finish(unit, result, self.summary).await;
    }
}
