//! Resumable submit/poll queue for asynchronous providers.
//!
//! Every submitted job is added to a persisted pending set before the
//! queue moves on, and removed only after its resolution has been
//! handed to the caller. A restarted process reloads the set and polls
//! those jobs before submitting anything new, so remote work already
//! paid for is never abandoned.
//!
//! ```text
//! Submitted --poll: completed + fetch---------> Completed
//! Submitted --poll: completed + bad result----> Failed
//! Submitted --poll: failed--------------------> Failed
//! Submitted --age > max_wait------------------> TimedOut
//! ```
//!
//! A fetch that fails in transport (connection error or call timeout)
//! leaves the job outstanding for the next round; any other fetch error
//! is the job's result and resolves it as failed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use spritebatch_core::error::CoreError;
use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::{AsyncRemoteClient, JobStatus, RemoteError, RemoteRequest};
use spritebatch_store::{PendingJob, PendingJobStore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Pacer;
use crate::error::PipelineError;

/// Default bound on jobs outstanding at once.
pub const DEFAULT_MAX_OUTSTANDING: usize = 10;

/// Default time between poll rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which a job is given up on.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(900);

/// File name of the pending set inside the scan root.
pub const PENDING_JOBS_FILE: &str = ".pending_jobs.json";

/// Queue limits and timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_outstanding: usize,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Timeout for each submit, poll and fetch call.
    pub call_timeout: Duration,
    /// Minimum gap between two submissions.
    pub submit_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            call_timeout: spritebatch_core::settings::DEFAULT_CALL_TIMEOUT,
            submit_interval: Duration::ZERO,
        }
    }
}

impl QueueSettings {
    pub fn validate(self) -> Result<Self, CoreError> {
        if self.max_outstanding == 0 {
            return Err(CoreError::Validation(
                "max outstanding jobs must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("poll interval", self.poll_interval),
            ("max wait", self.max_wait),
            ("call timeout", self.call_timeout),
        ] {
            if value.is_zero() {
                return Err(CoreError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(self)
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Result bytes as fetched from the provider.
    Completed(Vec<u8>),
    /// The provider reported failure or cancellation.
    Failed(String),
    /// No terminal status within the maximum wait.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub job: PendingJob,
    pub resolution: Resolution,
}

/// What the queue reports to its caller while running.
#[derive(Debug)]
pub enum QueueEvent {
    Resolved(ResolvedJob),
    /// The unit never became a job; it is not in the pending set.
    SubmitFailed { unit: WorkUnit, error: PipelineError },
}

/// The queue's caller: supplies requests and receives events.
#[async_trait]
pub trait QueueHandler: Send {
    /// Build the request for a unit about to be submitted.
    async fn request(&mut self, unit: &WorkUnit) -> Result<RemoteRequest, PipelineError>;

    /// Handle one event. A resolved job stays in the pending set until
    /// this returns.
    async fn on_event(&mut self, event: QueueEvent);
}

/// Persisted set of outstanding jobs plus the client that serves them.
pub struct JobQueue {
    client: Arc<dyn AsyncRemoteClient>,
    store: PendingJobStore,
    jobs: Vec<PendingJob>,
    pacer: Pacer,
    settings: QueueSettings,
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RemoteError::Timeout(limit)))
}

impl JobQueue {
    /// Open the queue, reloading whatever jobs the last run left behind.
    pub fn open(
        client: Arc<dyn AsyncRemoteClient>,
        store: PendingJobStore,
        settings: QueueSettings,
    ) -> Self {
        let jobs = store.load();
        if !jobs.is_empty() {
            tracing::info!(
                resumed = jobs.len(),
                path = %store.path().display(),
                "Resuming pending jobs from previous run",
            );
        }
        Self {
            client,
            store,
            jobs,
            pacer: Pacer::new(settings.submit_interval),
            settings,
        }
    }

    pub fn jobs(&self) -> &[PendingJob] {
        &self.jobs
    }

    pub fn outstanding(&self) -> usize {
        self.jobs.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.jobs.len() < self.settings.max_outstanding
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Submit one unit and add it to the persisted set.
    pub async fn submit(
        &mut self,
        unit: WorkUnit,
        request: &RemoteRequest,
    ) -> Result<&PendingJob, PipelineError> {
        if !self.has_capacity() {
            return Err(PipelineError::QueueFull(self.jobs.len()));
        }

        self.pacer.wait().await;
        let handles = bounded(self.settings.call_timeout, self.client.submit(request)).await?;
        tracing::info!(
            unit = %unit.label(),
            status_handle = %handles.status_handle,
            outstanding = self.jobs.len() + 1,
            "Job submitted",
        );

        self.jobs.push(PendingJob::new(
            handles.status_handle,
            handles.result_handle,
            unit,
        ));
        self.persist();
        let index = self.jobs.len() - 1;
        Ok(&self.jobs[index])
    }

    /// Poll every outstanding job once.
    ///
    /// Resolved jobs stay in the set until [`JobQueue::retire`] is called
    /// for them, so a crash while handling a result re-polls the job on
    /// the next run instead of losing it.
    pub async fn poll_all(&self) -> Vec<ResolvedJob> {
        let checks = self.jobs.iter().map(|job| async move {
            let resolution = self.check(job).await;
            (job, resolution)
        });

        let resolved: Vec<ResolvedJob> = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(job, resolution)| {
                resolution.map(|resolution| ResolvedJob {
                    job: job.clone(),
                    resolution,
                })
            })
            .collect();

        tracing::debug!(
            polled = self.jobs.len(),
            resolved = resolved.len(),
            "Poll round finished",
        );
        resolved
    }

    /// Remove a job from the persisted set.
    pub fn retire(&mut self, status_handle: &str) -> Option<PendingJob> {
        let index = self
            .jobs
            .iter()
            .position(|job| job.status_handle == status_handle)?;
        let job = self.jobs.remove(index);
        self.persist();
        Some(job)
    }

    /// Drive `units` through the queue until every job is resolved or
    /// `cancel` fires. Jobs loaded at open are polled before the first
    /// submission. Returns the number of jobs left outstanding.
    pub async fn run<H: QueueHandler>(
        &mut self,
        units: Vec<WorkUnit>,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> usize {
        let mut backlog: VecDeque<WorkUnit> = units.into();
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            queued = backlog.len(),
            resumed = self.jobs.len(),
            max_outstanding = self.settings.max_outstanding,
            "Job queue started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        outstanding = self.jobs.len(),
                        unsubmitted = backlog.len(),
                        "Job queue shutting down; pending jobs kept for next run",
                    );
                    break;
                }
                _ = ticker.tick() => {}
            }

            for resolved in self.poll_all().await {
                let handle = resolved.job.status_handle.clone();
                handler.on_event(QueueEvent::Resolved(resolved)).await;
                self.retire(&handle);
            }

            while self.has_capacity() {
                let Some(unit) = backlog.pop_front() else {
                    break;
                };
                let submitted = match handler.request(&unit).await {
                    Ok(request) => self.submit(unit.clone(), &request).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(error) = submitted {
                    tracing::warn!(unit = %unit.label(), error = %error, "Submission failed");
                    handler.on_event(QueueEvent::SubmitFailed { unit, error }).await;
                }
            }

            if self.jobs.is_empty() && backlog.is_empty() {
                break;
            }
        }

        self.jobs.len()
    }

    /// One poll of one job; `None` while it is still in flight.
    async fn check(&self, job: &PendingJob) -> Option<Resolution> {
        let limit = self.settings.call_timeout;
        match bounded(limit, self.client.poll(&job.status_handle)).await {
            Ok(JobStatus::Completed) => {
                match bounded(limit, self.client.fetch(&job.result_handle)).await {
                    Ok(bytes) => return Some(Resolution::Completed(bytes)),
                    Err(e @ (RemoteError::Request(_) | RemoteError::Timeout(_))) => {
                        tracing::warn!(
                            status_handle = %job.status_handle,
                            error = %e,
                            "Result fetch failed in transport; retrying next round",
                        )
                    }
                    Err(e) => {
                        tracing::warn!(
                            status_handle = %job.status_handle,
                            error = %e,
                            "Completed job has no usable result",
                        );
                        return Some(Resolution::Failed(e.to_string()));
                    }
                }
            }
            Ok(JobStatus::Failed(reason)) => return Some(Resolution::Failed(reason)),
            Ok(JobStatus::Pending) => {}
            Err(e) => tracing::debug!(
                status_handle = %job.status_handle,
                error = %e,
                "Poll failed; treating job as pending",
            ),
        }

        (job.elapsed(Utc::now()) > self.settings.max_wait).then_some(Resolution::TimedOut)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.jobs) {
            tracing::warn!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist pending jobs",
            );
        }
    }
}
