//! Discovery of candidate items on disk.
//!
//! Scanners never abort a run: entries that cannot be read or parsed
//! are logged at `warn` and left out.

use std::path::{Path, PathBuf};

use spritebatch_core::hashing::{fingerprint_file, sha256_hex};
use spritebatch_core::item::{Item, ItemPayload};
use walkdir::WalkDir;

use crate::describe::AssetDescription;
use crate::sizes::{SizeIndex, DEFAULT_SIZE, SIZE_INDEX_FILE};

/// Image extensions accepted by describe mode (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Directory name excluded from image scans (build output).
const DIST_DIR: &str = "dist";

/// Produces the candidate items for a run.
pub trait Scanner {
    fn scan(&self) -> Vec<Item>;
}

/// Root-relative identity with `/` separators.
pub fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether the file name starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn files_under(root: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable directory entry");
                None
            }
        })
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Finds image files to describe.
#[derive(Debug, Clone)]
pub struct ImageScanner {
    root: PathBuf,
}

impl ImageScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn accepts(&self, path: &Path) -> bool {
        let is_image = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        let in_dist = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .any(|c| c.as_os_str() == DIST_DIR);
        is_image && !in_dist
    }

    fn read_item(&self, path: PathBuf) -> Option<Item> {
        let (width, height) = match image::image_dimensions(&path) {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable image");
                return None;
            }
        };
        let fingerprint = match fingerprint_file(&path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unhashable image");
                return None;
            }
        };
        Some(Item {
            id: relative_id(&self.root, &path),
            source: path,
            width,
            height,
            fingerprint,
            payload: ItemPayload::Image,
        })
    }
}

impl Scanner for ImageScanner {
    fn scan(&self) -> Vec<Item> {
        files_under(&self.root)
            .filter(|path| self.accepts(path))
            .filter_map(|path| self.read_item(path))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// Finds description files to render, sized from a [`SizeIndex`].
#[derive(Debug, Clone)]
pub struct DescriptionScanner {
    root: PathBuf,
    sizes: SizeIndex,
}

impl DescriptionScanner {
    pub fn new(root: impl Into<PathBuf>, sizes: SizeIndex) -> Self {
        Self {
            root: root.into(),
            sizes,
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let is_size_index = path.parent() == Some(self.root.as_path())
            && path.file_name().is_some_and(|n| n == SIZE_INDEX_FILE);
        is_json && !is_hidden(path) && !is_size_index
    }

    fn read_item(&self, path: PathBuf) -> Option<Item> {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read description");
                return None;
            }
        };
        let description: AssetDescription = match serde_json::from_slice(&bytes) {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not parse description");
                return None;
            }
        };

        let id = relative_id(&self.root, &path);
        let png_key = relative_id(&self.root, &path.with_extension("png"));
        let size = self.sizes.get(&png_key).unwrap_or(DEFAULT_SIZE);
        let target_file = description
            .meta
            .as_ref()
            .and_then(|meta| meta.source_file.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
                format!("{stem}.png")
            });

        Some(Item {
            id,
            source: path,
            width: size.width,
            height: size.height,
            fingerprint: sha256_hex(&bytes),
            payload: ItemPayload::Description {
                keywords: description.keywords,
                asset_type: description.asset_type,
                target_file,
            },
        })
    }
}

impl Scanner for DescriptionScanner {
    /// Items ordered by `(width, height, path)` so same-size assets sit
    /// together.
    fn scan(&self) -> Vec<Item> {
        let mut items: Vec<Item> = files_under(&self.root)
            .filter(|path| self.accepts(path))
            .filter_map(|path| self.read_item(path))
            .collect();
        items.sort_by(|a, b| {
            (a.width, a.height, &a.source).cmp(&(b.width, b.height, &b.source))
        });
        items
    }
}
