//! Shared fixtures: an on-disk description workspace and mock providers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use spritebatch_core::item::Item;
use spritebatch_core::settings::BatchSettings;
use spritebatch_core::sheet;
use spritebatch_pipeline::generate::GenerateTask;
use spritebatch_pipeline::scanner::{DescriptionScanner, Scanner};
use spritebatch_pipeline::sizes::{ImageSize, SizeIndex};
use spritebatch_pipeline::{Coordinator, RunOptions};
use spritebatch_remote::{
    AsyncRemoteClient, JobHandles, JobStatus, RemoteClient, RemoteError, RemoteOutput,
    RemoteRequest,
};
use spritebatch_store::{ContentCache, FsStorage, OutputRule, Storage};

pub const CACHE_FILE: &str = ".image_generation_progress.json";

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A scan root of description files plus an output directory.
pub struct Workspace {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub out: PathBuf,
    sizes: SizeIndex,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("images");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&root).unwrap();
        Self {
            _dir: dir,
            root,
            out,
            sizes: SizeIndex::default(),
        }
    }

    /// Write `<root>/<name>.json` describing a `size`x`size` asset.
    pub fn describe(&mut self, name: &str, size: u32) -> PathBuf {
        let path = self.root.join(format!("{name}.json"));
        let body = serde_json::json!({
            "keywords": [name, "pixel"],
            "type": "icon",
            "_meta": { "source_file": format!("{name}.png") }
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&body).unwrap()).unwrap();
        self.sizes.insert(
            format!("{name}.png"),
            ImageSize {
                width: size,
                height: size,
            },
        );
        path
    }

    pub fn scan(&self) -> Vec<Item> {
        DescriptionScanner::new(&self.root, self.sizes.clone()).scan()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::new(FsStorage::new(OutputRule::TargetFile {
            dir: Some(self.out.clone()),
        }))
    }

    pub fn cache(&self) -> ContentCache {
        ContentCache::open(self.root.join(CACHE_FILE), self.storage(), false)
    }

    pub fn coordinator(&self, settings: BatchSettings) -> Coordinator {
        Coordinator::new(
            settings,
            self.cache(),
            Arc::new(GenerateTask::new()),
            RunOptions::default(),
        )
    }

    /// File names written to the output directory, sorted.
    pub fn outputs(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.out) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".tmp"))
            .collect();
        names.sort();
        names
    }
}

/// Settings for generate-mode tests: 10 columns, 64px threshold.
pub fn settings() -> BatchSettings {
    BatchSettings {
        size_threshold: 128,
        padding: 20,
        call_timeout: Duration::from_secs(5),
        ..BatchSettings::default()
    }
}

/// Opaque PNG of the requested canvas size.
pub fn canvas_png(width: u32, height: u32) -> Vec<u8> {
    sheet::encode_png(&RgbaImage::from_pixel(width, height, Rgba([200, 50, 50, 255]))).unwrap()
}

// ---------------------------------------------------------------------------
// Inline provider
// ---------------------------------------------------------------------------

/// How [`InlineMock`] answers.
pub enum Behaviour {
    /// Return an image of the requested canvas size.
    Succeed,
    /// Every call fails with HTTP 500.
    FailAll,
    /// Calls whose prompt contains the marker never answer in time.
    HangOn(&'static str),
}

pub struct InlineMock {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl InlineMock {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for InlineMock {
    async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteOutput, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::FailAll => Err(RemoteError::Api {
                status: 500,
                body: "upstream exploded".into(),
            }),
            Behaviour::HangOn(marker) if request.prompt.contains(marker) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(RemoteOutput::Image(canvas_png(request.width, request.height)))
            }
            _ => Ok(RemoteOutput::Image(canvas_png(request.width, request.height))),
        }
    }
}

// ---------------------------------------------------------------------------
// Asynchronous provider
// ---------------------------------------------------------------------------

/// Terminal answer an [`AsyncMock`] job reaches on its second poll.
#[derive(Clone)]
pub enum Outcome {
    Complete,
    Fail(&'static str),
    NeverFinish,
    /// Reports completion, but every fetch is rejected as malformed.
    FetchFails(&'static str),
}

/// Submit/poll/fetch provider that records every call in order and
/// tracks how many jobs are live on its side.
pub struct AsyncMock {
    outcome: Outcome,
    state: Mutex<AsyncState>,
}

#[derive(Default)]
struct AsyncState {
    log: Vec<String>,
    polls: HashMap<String, usize>,
    sizes: HashMap<String, (u32, u32)>,
    submitted: usize,
    live: usize,
    peak_live: usize,
}

impl AsyncMock {
    /// `already_live` counts jobs submitted by an earlier run.
    pub fn new(outcome: Outcome, already_live: usize) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            state: Mutex::new(AsyncState {
                live: already_live,
                peak_live: already_live,
                ..AsyncState::default()
            }),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn peak_live(&self) -> usize {
        self.state.lock().unwrap().peak_live
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().unwrap().submitted
    }

    /// Number of fetch calls made.
    pub fn fetches(&self) -> usize {
        self.log().iter().filter(|e| e.starts_with("fetch:")).count()
    }
}

#[async_trait]
impl AsyncRemoteClient for AsyncMock {
    async fn submit(&self, request: &RemoteRequest) -> Result<JobHandles, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.submitted += 1;
        let handle = format!("job-{}", state.submitted);
        state.log.push(format!("submit:{handle}"));
        state.sizes.insert(handle.clone(), (request.width, request.height));
        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);
        Ok(JobHandles {
            status_handle: handle.clone(),
            result_handle: handle,
        })
    }

    async fn poll(&self, status_handle: &str) -> Result<JobStatus, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("poll:{status_handle}"));
        let count = state.polls.entry(status_handle.to_string()).or_insert(0);
        *count += 1;
        if *count < 2 {
            return Ok(JobStatus::Pending);
        }
        Ok(match &self.outcome {
            Outcome::Complete | Outcome::FetchFails(_) => JobStatus::Completed,
            Outcome::Fail(reason) => JobStatus::Failed(reason.to_string()),
            Outcome::NeverFinish => JobStatus::Pending,
        })
    }

    async fn fetch(&self, result_handle: &str) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("fetch:{result_handle}"));
        state.live = state.live.saturating_sub(1);
        if let Outcome::FetchFails(reason) = &self.outcome {
            return Err(RemoteError::Malformed(reason.to_string()));
        }
        let (width, height) = state.sizes.get(result_handle).copied().unwrap_or((64, 64));
        Ok(canvas_png(width, height))
    }
}
