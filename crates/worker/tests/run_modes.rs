//! End-to-end runs of the worker against a temporary scan root.

use std::collections::HashMap;
use std::path::Path;

use image::{Rgba, RgbaImage};
use tokio_util::sync::CancellationToken;

use spritebatch_worker::config::WorkerConfig;
use spritebatch_worker::run::run;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))
        .save(path)
        .unwrap();
}

fn config(root: &Path, vars: &[(&str, &str)]) -> WorkerConfig {
    let mut map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.insert("SPRITEBATCH_ROOT".into(), root.display().to_string());
    WorkerConfig::from_lookup(|name| map.get(name).cloned()).unwrap()
}

// ---------------------------------------------------------------------------
// Sizes mode
// ---------------------------------------------------------------------------

/// Sizes mode records every png, keyed by its path relative to the root.
#[tokio::test]
async fn sizes_mode_writes_index() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("ui/button.png"), 32, 16);
    write_png(&dir.path().join("hero.png"), 200, 180);
    write_png(&dir.path().join(".hidden.png"), 8, 8);

    let config = config(dir.path(), &[("SPRITEBATCH_MODE", "sizes")]);
    let summary = run(config, CancellationToken::new()).await.unwrap();
    assert!(summary.is_none());

    let raw = std::fs::read_to_string(dir.path().join("image_sizes.json")).unwrap();
    let index: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(index["ui/button.png"]["width"], 32);
    assert_eq!(index["ui/button.png"]["height"], 16);
    assert_eq!(index["hero.png"]["width"], 200);
    assert!(index.get(".hidden.png").is_none());
}

/// A scan root that does not exist stops the run before any work.
#[tokio::test]
async fn missing_root_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("nope"), &[("SPRITEBATCH_MODE", "sizes")]);
    let err = run(config, CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("is not a directory"));
}

// ---------------------------------------------------------------------------
// Provider wiring
// ---------------------------------------------------------------------------

/// An unreachable provider fails every item and writes nothing.
#[tokio::test]
async fn unreachable_provider_fails_items_without_output() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 16, 16);
    write_png(&dir.path().join("b.png"), 16, 16);
    write_png(&dir.path().join("big.png"), 300, 300);

    let config = config(
        dir.path(),
        &[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("OPENROUTER_BASE_URL", "http://127.0.0.1:9"),
            ("SPRITEBATCH_CALL_TIMEOUT_SECS", "5"),
        ],
    );
    let summary = run(config, CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.saved, 0);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.remote_calls, 2);
    assert!(!dir.path().join("a.json").exists());
    assert!(!dir.path().join("big.json").exists());
}

/// A run cancelled before it starts reports nothing and touches nothing.
#[tokio::test]
async fn cancelled_sync_run_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 16, 16);

    let config = config(
        dir.path(),
        &[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("OPENROUTER_BASE_URL", "http://127.0.0.1:9"),
        ],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(run(config, cancel).await.unwrap().is_none());
    assert!(!dir.path().join("a.json").exists());
}

/// A missing ComfyUI workflow template is reported before any submission.
#[tokio::test]
async fn missing_workflow_template_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        dir.path(),
        &[
            ("SPRITEBATCH_MODE", "generate"),
            ("SPRITEBATCH_PROVIDER", "comfyui"),
            ("COMFYUI_API_URL", "http://127.0.0.1:9"),
            ("COMFYUI_WORKFLOW", "/definitely/not/here.json"),
        ],
    );
    let err = run(config, CancellationToken::new()).await.unwrap_err();
    assert!(format!("{err:#}").contains("reading workflow"));
    assert!(!dir.path().join(".pending_jobs.json").exists());
}
