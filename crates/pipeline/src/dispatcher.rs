//! Bounded-concurrency dispatch of work units.
//!
//! Each unit becomes one remote call. At most `max_concurrent` calls are
//! in flight at once, each under its own timeout, and call starts can be
//! spaced by a minimum interval. Outcomes are yielded in completion
//! order, each paired with the unit it came from; a failure or timeout
//! affects only its own unit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use spritebatch_core::settings::BatchSettings;
use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::RemoteError;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::PipelineError;

/// Spaces call starts at least `interval` apart. Clones share one
/// schedule.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next: Arc<Mutex<Option<Instant>>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next free start slot and claim it.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.interval);
    }
}

/// Result of one unit, paired with the unit itself.
#[derive(Debug)]
pub struct UnitOutcome<T> {
    pub unit: WorkUnit,
    pub result: Result<T, PipelineError>,
}

/// Runs units against a remote call with a concurrency bound.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_concurrent: usize,
    call_timeout: Duration,
    pacer: Pacer,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, call_timeout: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            call_timeout,
            pacer: Pacer::new(Duration::ZERO),
        }
    }

    /// Space call starts at least `interval` apart.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.pacer = Pacer::new(interval);
        self
    }

    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self::new(settings.max_concurrent, settings.call_timeout)
            .with_min_interval(settings.call_interval)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stream of outcomes in completion order.
    ///
    /// `call` is invoked lazily, so no more than `max_concurrent` calls
    /// exist at any instant. A call that exceeds the timeout is dropped
    /// and reported as [`RemoteError::Timeout`]. Waiting for a pacing
    /// slot does not count against the timeout.
    pub fn stream<'a, F, Fut, T>(
        &self,
        units: Vec<WorkUnit>,
        call: F,
    ) -> impl Stream<Item = UnitOutcome<T>> + 'a
    where
        F: Fn(WorkUnit) -> Fut + 'a,
        Fut: Future<Output = Result<T, PipelineError>> + 'a,
        T: 'a,
    {
        let timeout = self.call_timeout;
        let pacer = self.pacer.clone();
        stream::iter(units)
            .map(move |unit| {
                let pacer = pacer.clone();
                let pending = call(unit.clone());
                async move {
                    pacer.wait().await;
                    let result = match tokio::time::timeout(timeout, pending).await {
                        Ok(result) => result,
                        Err(_) => Err(RemoteError::Timeout(timeout).into()),
                    };
                    UnitOutcome { unit, result }
                }
            })
            .buffer_unordered(self.max_concurrent)
    }

    /// Run every unit and collect the outcomes.
    pub async fn run<F, Fut, T>(&self, units: Vec<WorkUnit>, call: F) -> Vec<UnitOutcome<T>>
    where
        F: Fn(WorkUnit) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.stream(units, call).collect().await
    }
}
