//! Generate mode: keyword descriptions in, images out.
//!
//! A batch becomes one sprite-sheet prompt that spells out the exact
//! canvas geometry; the returned composite is cut back into cells with
//! [`sheet::unpack_bytes`]. Large items are generated one per call.
//! Composites can also be kept as they arrived, for inspection.

use std::path::{Path, PathBuf};

use spritebatch_core::grid::{Batch, GridLayout};
use spritebatch_core::hashing::sha256_hex;
use spritebatch_core::item::Item;
use spritebatch_core::sheet;
use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::{RemoteOutput, RemoteRequest};
use spritebatch_store::record::write_bytes_atomic;

use crate::error::PipelineError;
use crate::task::GenerationTask;

const STYLE: &str = "Pixel art, isometric view, high contrast with clear edges.";

/// [`GenerationTask`] for generate mode.
#[derive(Debug, Clone, Default)]
pub struct GenerateTask {
    sheet_dir: Option<PathBuf>,
}

impl GenerateTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write every fetched composite into `dir` before it is cut.
    pub fn with_sheet_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sheet_dir = Some(dir.into());
        self
    }

    pub fn sheet_dir(&self) -> Option<&Path> {
        self.sheet_dir.as_deref()
    }

    fn keep_sheet(&self, batch: &Batch, bytes: &[u8]) -> Result<(), PipelineError> {
        let Some(dir) = &self.sheet_dir else {
            return Ok(());
        };
        let path = dir.join(sheet_file_name(batch, bytes));
        write_bytes_atomic(&path, bytes)?;
        tracing::debug!(path = %path.display(), items = batch.len(), "Sprite sheet kept");
        Ok(())
    }
}

/// `sheet-<cell>-<digest>.<ext>`: the digest covers the batch's item
/// ids, the extension follows the composite's actual format.
fn sheet_file_name(batch: &Batch, bytes: &[u8]) -> String {
    let ids = batch
        .items
        .iter()
        .map(|item| item.id.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let digest = sha256_hex(ids.as_bytes());
    let ext = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    format!(
        "sheet-{}x{}-{}.{ext}",
        batch.layout.cell_width,
        batch.layout.cell_height,
        &digest[..12]
    )
}

/// Prompt for a sprite sheet of `items` laid out on `layout`.
pub fn sheet_prompt(layout: &GridLayout, items: &[Item]) -> String {
    let assets = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}: {}", i + 1, item.asset_type(), item.keywords_text()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Generate a sprite sheet containing {count} unique game assets on a transparent background.

Grid layout specifications:
- Exactly {cols} columns x {rows} rows
- Each cell: exactly {cw}x{ch} pixels
- {pad} pixels gap between cells (no edge padding)
- Total canvas size: {width}x{height} pixels
- Assets centered within their cells
- Grid starts at pixel (0,0) - no margins

Style: {STYLE}

Assets to generate (arranged left-to-right, top-to-bottom):
{assets}",
        count = items.len(),
        cols = layout.cols,
        rows = layout.rows,
        cw = layout.cell_width,
        ch = layout.cell_height,
        pad = layout.padding,
        width = layout.canvas_width(),
        height = layout.canvas_height(),
    )
}

/// Prompt for one item.
pub fn single_prompt(item: &Item) -> String {
    format!(
        "Generate a single game asset image:
Type: {}
Description: {}

Style: Pixel art, isometric view, high contrast, transparent background.
Size: {}x{} pixels, centered.",
        item.asset_type(),
        item.keywords_text(),
        item.width,
        item.height,
    )
}

impl GenerationTask for GenerateTask {
    fn name(&self) -> &'static str {
        "generate"
    }

    fn build_request(&self, unit: &WorkUnit) -> Result<RemoteRequest, PipelineError> {
        Ok(match unit {
            WorkUnit::Batch(batch) => RemoteRequest::generate(
                sheet_prompt(&batch.layout, &batch.items),
                batch.layout.canvas_width(),
                batch.layout.canvas_height(),
            ),
            WorkUnit::Single(item) => {
                RemoteRequest::generate(single_prompt(item), item.width, item.height)
            }
        })
    }

    fn split(&self, unit: &WorkUnit, output: RemoteOutput) -> Result<Vec<Vec<u8>>, PipelineError> {
        let bytes = output.into_image()?;
        match unit {
            WorkUnit::Batch(batch) => {
                self.keep_sheet(batch, &bytes)?;
                split_sheet(batch, &bytes)
            }
            WorkUnit::Single(_) => Ok(vec![sheet::normalize_png(&bytes)?]),
        }
    }
}

/// Cut a composite into PNG cells for the batch's items. Trailing
/// cells beyond the item count are dropped here.
fn split_sheet(batch: &Batch, bytes: &[u8]) -> Result<Vec<Vec<u8>>, PipelineError> {
    let cells = sheet::unpack_bytes(bytes, &batch.layout)?;
    let unused = cells.len().saturating_sub(batch.len());
    if unused > 0 {
        tracing::debug!(unused, "Discarding unclaimed trailing cells");
    }
    cells
        .iter()
        .take(batch.len())
        .map(|cell| sheet::encode_png(cell).map_err(PipelineError::from))
        .collect()
}
