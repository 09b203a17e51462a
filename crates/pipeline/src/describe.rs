//! Describe mode: images in, keyword descriptions out.
//!
//! Small images of one size are composited into a sprite sheet and
//! described in a single call; the model answers with one tile entry per
//! cell (1-indexed row/col). Large images are described one at a time.

use std::path::Path;

use chrono::Utc;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use spritebatch_core::grid::Batch;
use spritebatch_core::item::Item;
use spritebatch_core::sheet;
use spritebatch_core::unit::WorkUnit;
use spritebatch_remote::{Attachment, RemoteOutput, RemoteRequest};

use crate::error::PipelineError;
use crate::task::GenerationTask;

/// Placeholder keyword and type for cells the model skipped.
pub const UNKNOWN: &str = "unknown";

const SHEET_BATCH_METHOD: &str = "sprite_sheet";

const GRID_PROMPT: &str = "Analyze this sprite sheet grid containing exactly {count} game assets \
arranged in a grid of {rows} rows and {cols} columns.
Each cell represents one asset. Process left-to-right, top-to-bottom.

Return a JSON object with a \"tiles\" array. Each entry must have:
{\"row\": int, \"col\": int, \"keywords\": [\"word1\", \"word2\", \"word3\", \"word4\", \"word5\"], \"type\": \"tile|sprite|icon|ui_element\"}

Row and col are 1-indexed. Return ONLY valid JSON.";

const SINGLE_PROMPT: &str = "Describe this game asset in exactly 5 keywords.
Return JSON: {\"keywords\": [\"word1\", \"word2\", \"word3\", \"word4\", \"word5\"], \"type\": \"tile|sprite|icon|ui_element\"}
Return ONLY valid JSON.";

// ---------------------------------------------------------------------------
// Description document
// ---------------------------------------------------------------------------

/// Output format of a description file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionFormat {
    Json,
    Markdown,
}

impl DescriptionFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

impl std::str::FromStr for DescriptionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(format!("unknown description format '{other}' (expected json or md)")),
        }
    }
}

/// A description file as written by describe mode and read by generate mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescription {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Empty when the file does not declare a type.
    #[serde(rename = "type", default)]
    pub asset_type: String,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DescriptionMeta>,
}

/// Provenance block stored under `_meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionMeta {
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_method: Option<String>,
}

fn unknown_type() -> String {
    UNKNOWN.to_string()
}

impl AssetDescription {
    fn placeholder() -> Self {
        Self {
            keywords: vec![UNKNOWN.to_string()],
            asset_type: UNKNOWN.to_string(),
            meta: None,
        }
    }

    fn with_meta(mut self, item: &Item, batch_method: Option<&str>) -> Self {
        self.meta = Some(DescriptionMeta {
            source_file: Some(item.file_name()),
            hash: Some(item.fingerprint.clone()),
            generated_at: Some(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            batch_method: batch_method.map(str::to_string),
        });
        self
    }

    /// Markdown rendering used for `md` output.
    pub fn to_markdown(&self, file_name: &str) -> String {
        let mut md = format!("# {file_name}\n\n");
        if !self.keywords.is_empty() {
            md.push_str(&format!("**Keywords:** {}\n\n", self.keywords.join(", ")));
        }
        md.push_str(&format!("**Type:** {}\n\n", self.asset_type));
        md
    }
}

/// Model answer for a sprite sheet.
#[derive(Debug, Deserialize)]
struct TilesResponse {
    #[serde(default)]
    tiles: Vec<Tile>,
}

#[derive(Debug, Deserialize)]
struct Tile {
    row: u32,
    col: u32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(rename = "type", default = "unknown_type")]
    asset_type: String,
}

/// Model answer for a single image.
#[derive(Debug, Deserialize)]
struct SingleResponse {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(rename = "type", default = "unknown_type")]
    asset_type: String,
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, PipelineError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| PipelineError::Response(format!("invalid description JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// [`GenerationTask`] for describe mode.
#[derive(Debug, Clone, Copy)]
pub struct DescribeTask {
    format: DescriptionFormat,
}

impl DescribeTask {
    pub fn new(format: DescriptionFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> DescriptionFormat {
        self.format
    }

    fn render(&self, item: &Item, description: &AssetDescription) -> Result<Vec<u8>, PipelineError> {
        match self.format {
            DescriptionFormat::Json => serde_json::to_vec_pretty(description)
                .map_err(|e| PipelineError::Response(format!("cannot serialise description: {e}"))),
            DescriptionFormat::Markdown => Ok(description.to_markdown(&item.file_name()).into_bytes()),
        }
    }

    fn sheet_request(&self, batch: &Batch) -> Result<RemoteRequest, PipelineError> {
        let cells = batch
            .items
            .iter()
            .map(open_image)
            .collect::<Result<Vec<_>, _>>()?;
        let canvas = sheet::compose(&batch.layout, &cells)?;
        let png = sheet::encode_png(&canvas)?;

        let prompt = GRID_PROMPT
            .replace("{count}", &batch.len().to_string())
            .replace("{rows}", &batch.layout.rows.to_string())
            .replace("{cols}", &batch.layout.cols.to_string());
        Ok(RemoteRequest::describe(
            prompt,
            Attachment::png(png),
            canvas.width(),
            canvas.height(),
        ))
    }

    fn split_sheet(&self, batch: &Batch, text: &str) -> Result<Vec<Vec<u8>>, PipelineError> {
        let response: TilesResponse = parse_json(text)?;
        let mut missing = 0usize;

        let outputs = batch
            .placements()
            .map(|(pos, item)| {
                let (row, col) = pos.one_based();
                let description = match response.tiles.iter().find(|t| t.row == row && t.col == col) {
                    Some(tile) => AssetDescription {
                        keywords: tile.keywords.clone(),
                        asset_type: tile.asset_type.clone(),
                        meta: None,
                    }
                    .with_meta(item, Some(SHEET_BATCH_METHOD)),
                    None => {
                        missing += 1;
                        AssetDescription::placeholder().with_meta(item, None)
                    }
                };
                self.render(item, &description)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if missing > 0 {
            tracing::warn!(
                missing,
                cells = batch.len(),
                "Sprite sheet answer skipped cells; placeholders written",
            );
        }
        Ok(outputs)
    }
}

impl GenerationTask for DescribeTask {
    fn name(&self) -> &'static str {
        "describe"
    }

    fn build_request(&self, unit: &WorkUnit) -> Result<RemoteRequest, PipelineError> {
        match unit {
            WorkUnit::Batch(batch) => self.sheet_request(batch),
            WorkUnit::Single(item) => {
                let bytes = std::fs::read(&item.source).map_err(|e| input_error(item, e))?;
                let attachment = Attachment {
                    mime_type: mime_type(&item.source).to_string(),
                    bytes,
                };
                Ok(RemoteRequest::describe(
                    SINGLE_PROMPT.to_string(),
                    attachment,
                    item.width,
                    item.height,
                ))
            }
        }
    }

    fn split(&self, unit: &WorkUnit, output: RemoteOutput) -> Result<Vec<Vec<u8>>, PipelineError> {
        let text = output.into_text()?;
        match unit {
            WorkUnit::Batch(batch) => self.split_sheet(batch, &text),
            WorkUnit::Single(item) => {
                let response: SingleResponse = parse_json(&text)?;
                let description = AssetDescription {
                    keywords: response.keywords,
                    asset_type: response.asset_type,
                    meta: None,
                }
                .with_meta(item, None);
                Ok(vec![self.render(item, &description)?])
            }
        }
    }
}

fn open_image(item: &Item) -> Result<DynamicImage, PipelineError> {
    image::open(&item.source).map_err(|e| input_error(item, e))
}

fn input_error(item: &Item, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Input {
        item: item.id.clone(),
        reason: e.to_string(),
    }
}

/// MIME type for an image path, by extension.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::{Rgba, RgbaImage};
    use spritebatch_core::grid::GridLayout;
    use spritebatch_core::item::ItemPayload;

    fn item(dir: &Path, name: &str, colour: [u8; 4]) -> Item {
        let source = dir.join(name);
        RgbaImage::from_pixel(16, 16, Rgba(colour)).save(&source).unwrap();
        Item {
            id: name.into(),
            source,
            width: 16,
            height: 16,
            fingerprint: format!("hash-{name}"),
            payload: ItemPayload::Image,
        }
    }

    fn batch(dir: &Path, count: usize, cols: u32) -> Batch {
        let items: Vec<_> = (0..count)
            .map(|i| item(dir, &format!("tile{i}.png"), [i as u8 * 10, 0, 0, 255]))
            .collect();
        let layout = GridLayout::for_count(count, cols, 16, 16, 0);
        Batch::new(layout, items).unwrap()
    }

    fn parse_output(bytes: &[u8]) -> AssetDescription {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn sheet_request_composites_cells() {
        let dir = tempfile::tempdir().unwrap();
        let task = DescribeTask::new(DescriptionFormat::Json);
        let unit = WorkUnit::Batch(batch(dir.path(), 3, 2));

        let request = task.build_request(&unit).unwrap();
        assert_eq!((request.width, request.height), (32, 32));
        assert!(request.prompt.contains("exactly 3 game assets"));
        assert!(request.prompt.contains("2 rows and 2 columns"));

        let attachment = request.attachment.unwrap();
        let sheet = image::load_from_memory(&attachment.bytes).unwrap().to_rgba8();
        assert_eq!(sheet.get_pixel(20, 4), &Rgba([10, 0, 0, 255]));
        assert_eq!(sheet.get_pixel(4, 20), &Rgba([20, 0, 0, 255]));
        assert_eq!(sheet.get_pixel(20, 20)[3], 0);
    }

    #[test]
    fn unreadable_source_fails_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = batch(dir.path(), 2, 2);
        b.items[1].source = dir.path().join("gone.png");
        let task = DescribeTask::new(DescriptionFormat::Json);

        assert_matches!(
            task.build_request(&WorkUnit::Batch(b)),
            Err(PipelineError::Input { item, .. }) if item == "tile1.png"
        );
    }

    #[test]
    fn tiles_are_matched_by_one_based_position() {
        let dir = tempfile::tempdir().unwrap();
        let task = DescribeTask::new(DescriptionFormat::Json);
        let unit = WorkUnit::Batch(batch(dir.path(), 3, 2));
        let answer = r#"```json
{"tiles": [
  {"row": 2, "col": 1, "keywords": ["potion"], "type": "icon"},
  {"row": 1, "col": 1, "keywords": ["grass", "green"], "type": "tile"}
]}
```"#;

        let outputs = task.split(&unit, RemoteOutput::Text(answer.into())).unwrap();
        assert_eq!(outputs.len(), 3);

        let first = parse_output(&outputs[0]);
        assert_eq!(first.keywords, ["grass", "green"]);
        assert_eq!(first.asset_type, "tile");
        let meta = first.meta.unwrap();
        assert_eq!(meta.source_file.as_deref(), Some("tile0.png"));
        assert_eq!(meta.hash.as_deref(), Some("hash-tile0.png"));
        assert_eq!(meta.batch_method.as_deref(), Some("sprite_sheet"));

        let second = parse_output(&outputs[1]);
        assert_eq!(second.keywords, ["unknown"]);
        assert_eq!(second.asset_type, "unknown");
        assert!(second.meta.unwrap().batch_method.is_none());

        assert_eq!(parse_output(&outputs[2]).keywords, ["potion"]);
    }

    #[test]
    fn invalid_json_fails_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let task = DescribeTask::new(DescriptionFormat::Json);
        let unit = WorkUnit::Batch(batch(dir.path(), 2, 2));

        assert_matches!(
            task.split(&unit, RemoteOutput::Text("Sorry, I can't".into())),
            Err(PipelineError::Response(_))
        );
    }

    #[test]
    fn single_answer_renders_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let task = DescribeTask::new(DescriptionFormat::Markdown);
        let unit = WorkUnit::Single(item(dir.path(), "castle.png", [0, 0, 255, 255]));

        let request = task.build_request(&unit).unwrap();
        assert_eq!(request.attachment.unwrap().mime_type, "image/png");

        let outputs = task
            .split(
                &unit,
                RemoteOutput::Text(r#"{"keywords": ["castle", "stone"], "type": "sprite"}"#.into()),
            )
            .unwrap();
        let md = String::from_utf8(outputs[0].clone()).unwrap();
        assert_eq!(
            md,
            "# castle.png\n\n**Keywords:** castle, stone\n\n**Type:** sprite\n\n"
        );
    }

    #[test]
    fn image_answer_is_malformed_for_describe() {
        let dir = tempfile::tempdir().unwrap();
        let task = DescribeTask::new(DescriptionFormat::Json);
        let unit = WorkUnit::Single(item(dir.path(), "a.png", [0; 4]));
        assert_matches!(
            task.split(&unit, RemoteOutput::Image(vec![1])),
            Err(PipelineError::Remote(_))
        );
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {}  "), "{}");
    }

    #[test]
    fn format_parses_from_config_strings() {
        assert_eq!("json".parse::<DescriptionFormat>().unwrap(), DescriptionFormat::Json);
        assert_eq!("MD".parse::<DescriptionFormat>().unwrap(), DescriptionFormat::Markdown);
        assert!("yaml".parse::<DescriptionFormat>().is_err());
        assert_eq!(DescriptionFormat::Markdown.extension(), "md");
    }

    #[test]
    fn mime_type_by_extension() {
        assert_eq!(mime_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_type(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_type(Path::new("a")), "image/png");
    }
}
