//! One worker run, wired from a [`WorkerConfig`].

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use spritebatch_core::item::Item;
use spritebatch_pipeline::describe::DescribeTask;
use spritebatch_pipeline::generate::GenerateTask;
use spritebatch_pipeline::job_queue::JobQueue;
use spritebatch_pipeline::scanner::{DescriptionScanner, ImageScanner, Scanner};
use spritebatch_pipeline::sizes::SizeIndex;
use spritebatch_pipeline::task::GenerationTask;
use spritebatch_pipeline::{Coordinator, RunSummary};
use spritebatch_remote::{ComfyUiClient, OpenRouterClient, RemoteClient};
use spritebatch_store::{ContentCache, FsStorage, OutputRule, PendingJobStore, Storage};

use crate::config::{Mode, ProviderConfig, WorkerConfig};

/// Execute the configured mode.
///
/// Returns `None` when the run was interrupted before it finished or
/// when the mode makes no remote calls.
pub async fn run(
    config: WorkerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Option<RunSummary>> {
    if !config.root.is_dir() {
        anyhow::bail!("{} is not a directory", config.root.display());
    }

    match config.mode {
        Mode::Sizes => {
            record_sizes(&config.root)?;
            Ok(None)
        }
        Mode::Describe => {
            let items = ImageScanner::new(&config.root).scan();
            tracing::info!(count = items.len(), root = %config.root.display(), "Scanned images");
            let rule = OutputRule::ReplaceExtension(config.description_format.extension().to_string());
            let task = Arc::new(DescribeTask::new(config.description_format));
            execute(&config, rule, task, items, cancel).await
        }
        Mode::Generate => {
            let sizes = SizeIndex::load(&SizeIndex::default_path(&config.root));
            if sizes.is_empty() {
                tracing::warn!("No recorded image sizes; every asset uses the default size");
            }
            let items = DescriptionScanner::new(&config.root, sizes).scan();
            tracing::info!(count = items.len(), root = %config.root.display(), "Scanned descriptions");
            let rule = OutputRule::TargetFile {
                dir: config.output_dir.clone(),
            };
            let mut task = GenerateTask::new();
            if config.save_sheets {
                let dir = config.sheet_dir();
                tracing::info!(dir = %dir.display(), "Keeping fetched sprite sheets");
                task = task.with_sheet_dir(dir);
            }
            execute(&config, rule, Arc::new(task), items, cancel).await
        }
    }
}

/// Scan `root`, store the size index and log the histograms.
fn record_sizes(root: &Path) -> anyhow::Result<()> {
    let index = SizeIndex::scan(root);
    let path = SizeIndex::default_path(root);
    index
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(count = index.len(), path = %path.display(), "Recorded image sizes");
    index.log_histograms();
    Ok(())
}

async fn execute(
    config: &WorkerConfig,
    rule: OutputRule,
    task: Arc<dyn GenerationTask>,
    items: Vec<Item>,
    cancel: CancellationToken,
) -> anyhow::Result<Option<RunSummary>> {
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(rule));
    let cache = ContentCache::open(config.cache_path(), storage, config.force);
    if config.force {
        tracing::info!("Force enabled; cached results are ignored");
    }
    let mut coordinator = Coordinator::new(config.batch.clone(), cache, task, config.run_options());

    let provider = config
        .provider
        .as_ref()
        .context("no provider configured for this mode")?;

    match provider {
        ProviderConfig::OpenRouter {
            api_key,
            base_url,
            model,
            image,
        } => {
            let client: Arc<dyn RemoteClient> = Arc::new(
                OpenRouterClient::with_client(
                    reqwest::Client::new(),
                    base_url.clone(),
                    api_key.clone(),
                    model.clone(),
                )
                .with_image_config(image.clone()),
            );
            tracing::info!(model = %model, "Using OpenRouter");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Run interrupted; completed items are already recorded");
                    Ok(None)
                }
                summary = coordinator.run_sync(client, items) => Ok(Some(summary)),
            }
        }
        ProviderConfig::ComfyUi { api_url, workflow } => {
            let template = std::fs::read_to_string(workflow)
                .with_context(|| format!("reading workflow {}", workflow.display()))?;
            let template: serde_json::Value = serde_json::from_str(&template)
                .with_context(|| format!("parsing workflow {}", workflow.display()))?;
            let client = Arc::new(ComfyUiClient::new(api_url.clone(), template));
            tracing::info!(api_url = %api_url, "Using ComfyUI");

            let mut queue = JobQueue::open(
                client,
                PendingJobStore::new(config.pending_path()),
                config.queue.clone(),
            );
            let summary = coordinator.run_async(&mut queue, items, &cancel).await;
            Ok(Some(summary))
        }
    }
}
