//! Output storage.
//!
//! The pipeline only ever asks three things of storage: write an item's
//! output, check whether it exists, and fingerprint the item's current
//! source. [`FsStorage`] maps items to output paths with an
//! [`OutputRule`].

use std::path::{Path, PathBuf};

use spritebatch_core::hashing::fingerprint_file;
use spritebatch_core::item::{Item, ItemPayload};

use crate::error::StoreError;
use crate::record::write_bytes_atomic;

/// Durable output storage used by the pipeline.
pub trait Storage: Send + Sync {
    /// Where the item's output lives.
    fn output_path(&self, item: &Item) -> PathBuf;

    /// Durably write the item's output. Returns once the bytes are on disk.
    fn write_output(&self, item: &Item, bytes: &[u8]) -> Result<(), StoreError>;

    /// Whether the item's output is present.
    fn output_exists(&self, item: &Item) -> bool;

    /// Fingerprint of the item's source as it is now.
    fn read_fingerprint(&self, item: &Item) -> Result<String, StoreError>;
}

/// How an item maps to its output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRule {
    /// `<source stem>.<extension>` next to the source.
    ReplaceExtension(String),
    /// The item's declared target file name, inside `dir` when set or
    /// next to the source otherwise.
    TargetFile { dir: Option<PathBuf> },
}

/// Filesystem-backed [`Storage`].
#[derive(Debug, Clone)]
pub struct FsStorage {
    rule: OutputRule,
}

impl FsStorage {
    pub fn new(rule: OutputRule) -> Self {
        Self { rule }
    }

    fn sibling(source: &Path, name: &str) -> PathBuf {
        match source.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Storage for FsStorage {
    fn output_path(&self, item: &Item) -> PathBuf {
        match &self.rule {
            OutputRule::ReplaceExtension(ext) => item.source.with_extension(ext),
            OutputRule::TargetFile { dir } => {
                let name = match &item.payload {
                    ItemPayload::Description { target_file, .. } if !target_file.is_empty() => {
                        target_file.clone()
                    }
                    _ => item
                        .source
                        .with_extension("png")
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| format!("{}.png", item.id)),
                };
                match dir {
                    Some(dir) => dir.join(name),
                    None => Self::sibling(&item.source, &name),
                }
            }
        }
    }

    fn write_output(&self, item: &Item, bytes: &[u8]) -> Result<(), StoreError> {
        write_bytes_atomic(&self.output_path(item), bytes)
    }

    fn output_exists(&self, item: &Item) -> bool {
        self.output_path(item).is_file()
    }

    fn read_fingerprint(&self, item: &Item) -> Result<String, StoreError> {
        fingerprint_file(&item.source).map_err(|e| StoreError::io(&item.source, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_item(source: &Path) -> Item {
        Item {
            id: "hero.png".into(),
            source: source.to_path_buf(),
            width: 32,
            height: 32,
            fingerprint: String::new(),
            payload: ItemPayload::Image,
        }
    }

    fn description_item(source: &Path, target: &str) -> Item {
        Item {
            id: "hero.json".into(),
            source: source.to_path_buf(),
            width: 32,
            height: 32,
            fingerprint: String::new(),
            payload: ItemPayload::Description {
                keywords: vec!["knight".into()],
                asset_type: "sprite".into(),
                target_file: target.into(),
            },
        }
    }

    #[test]
    fn replace_extension_rule() {
        let storage = FsStorage::new(OutputRule::ReplaceExtension("json".into()));
        let item = image_item(Path::new("images/chars/hero.png"));
        assert_eq!(
            storage.output_path(&item),
            PathBuf::from("images/chars/hero.json")
        );
    }

    #[test]
    fn target_file_next_to_source() {
        let storage = FsStorage::new(OutputRule::TargetFile { dir: None });
        let item = description_item(Path::new("images/chars/hero.json"), "hero_v2.png");
        assert_eq!(
            storage.output_path(&item),
            PathBuf::from("images/chars/hero_v2.png")
        );
    }

    #[test]
    fn target_file_in_output_dir() {
        let storage = FsStorage::new(OutputRule::TargetFile {
            dir: Some(PathBuf::from("out")),
        });
        let item = description_item(Path::new("images/chars/hero.json"), "hero.png");
        assert_eq!(storage.output_path(&item), PathBuf::from("out/hero.png"));
    }

    #[test]
    fn target_file_falls_back_to_png_stem() {
        let storage = FsStorage::new(OutputRule::TargetFile { dir: None });
        let item = description_item(Path::new("images/hero.json"), "");
        assert_eq!(storage.output_path(&item), PathBuf::from("images/hero.png"));
    }

    #[test]
    fn write_creates_parents_and_exists_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(OutputRule::TargetFile {
            dir: Some(dir.path().join("gen/deep")),
        });
        let item = description_item(&dir.path().join("hero.json"), "hero.png");

        assert!(!storage.output_exists(&item));
        storage.write_output(&item, b"png-bytes").unwrap();
        assert!(storage.output_exists(&item));
        assert_eq!(
            std::fs::read(dir.path().join("gen/deep/hero.png")).unwrap(),
            b"png-bytes"
        );
    }

    #[test]
    fn fingerprint_tracks_source_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hero.png");
        std::fs::write(&source, b"v1").unwrap();
        let storage = FsStorage::new(OutputRule::ReplaceExtension("json".into()));
        let item = image_item(&source);

        let first = storage.read_fingerprint(&item).unwrap();
        std::fs::write(&source, b"v2").unwrap();
        assert_ne!(storage.read_fingerprint(&item).unwrap(), first);
    }
}
