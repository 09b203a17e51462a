//! Persisted index of original image sizes.
//!
//! Generate mode reads descriptions, not images, so the native size of
//! each asset has to be recorded while the images still exist. The index
//! maps a root-relative `.png` path to its dimensions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spritebatch_store::record::{read_json_or_default, write_json_atomic};
use spritebatch_store::StoreError;
use walkdir::WalkDir;

use crate::scanner::{is_hidden, relative_id};

/// File name of the index inside the scan root.
pub const SIZE_INDEX_FILE: &str = "image_sizes.json";

/// Size assumed for assets missing from the index.
pub const DEFAULT_SIZE: ImageSize = ImageSize {
    width: 64,
    height: 64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Relative path to size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeIndex {
    entries: BTreeMap<String, ImageSize>,
}

impl SizeIndex {
    /// Location of the index for a scan root.
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(SIZE_INDEX_FILE)
    }

    /// Load an index; missing or unreadable means empty.
    pub fn load(path: &Path) -> Self {
        read_json_or_default(path)
    }

    /// Measure every non-hidden `.png` under `root`.
    pub fn scan(root: &Path) -> Self {
        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || is_hidden(path) || !has_png_extension(path) {
                continue;
            }
            match image::image_dimensions(path) {
                Ok((width, height)) => {
                    entries.insert(relative_id(root, path), ImageSize { width, height });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Could not read image size");
                }
            }
        }
        Self { entries }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, relative_path: &str) -> Option<ImageSize> {
        self.entries.get(relative_path).copied()
    }

    pub fn insert(&mut self, relative_path: impl Into<String>, size: ImageSize) {
        self.entries.insert(relative_path.into(), size);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of images per width.
    pub fn width_histogram(&self) -> BTreeMap<u32, usize> {
        histogram(self.entries.values().map(|s| s.width))
    }

    /// Number of images per height.
    pub fn height_histogram(&self) -> BTreeMap<u32, usize> {
        histogram(self.entries.values().map(|s| s.height))
    }

    /// Log both histograms at info level.
    pub fn log_histograms(&self) {
        for (width, count) in self.width_histogram() {
            tracing::info!(width, count, "Width distribution");
        }
        for (height, count) in self.height_histogram() {
            tracing::info!(height, count, "Height distribution");
        }
    }
}

fn histogram(values: impl Iterator<Item = u32>) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

fn has_png_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(path: &Path, w: u32, h: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255])).save(path).unwrap();
    }

    #[test]
    fn scan_records_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        png(&dir.path().join("tiles/grass.png"), 32, 32);
        png(&dir.path().join("chars/hero.png"), 48, 64);
        png(&dir.path().join(".hidden.png"), 8, 8);
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let index = SizeIndex::scan(dir.path());
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("tiles/grass.png"),
            Some(ImageSize { width: 32, height: 32 })
        );
        assert_eq!(index.get("chars/hero.png").unwrap().height, 64);
    }

    #[test]
    fn corrupt_png_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        png(&dir.path().join("ok.png"), 16, 16);

        let index = SizeIndex::scan(dir.path());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn save_and_load_sorted_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = SizeIndex::default_path(dir.path());
        let mut index = SizeIndex::default();
        index.insert("b.png", ImageSize { width: 2, height: 2 });
        index.insert("a.png", ImageSize { width: 1, height: 1 });
        index.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.find("a.png").unwrap() < raw.find("b.png").unwrap());
        assert_eq!(SizeIndex::load(&path), index);
    }

    #[test]
    fn histograms_count_dimensions() {
        let mut index = SizeIndex::default();
        index.insert("a.png", ImageSize { width: 32, height: 32 });
        index.insert("b.png", ImageSize { width: 32, height: 64 });
        index.insert("c.png", ImageSize { width: 128, height: 64 });

        assert_eq!(
            index.width_histogram().into_iter().collect::<Vec<_>>(),
            [(32, 2), (128, 1)]
        );
        assert_eq!(
            index.height_histogram().into_iter().collect::<Vec<_>>(),
            [(32, 1), (64, 2)]
        );
    }
}
