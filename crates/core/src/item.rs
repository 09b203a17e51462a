//! The logical unit of work.
//!
//! An [`Item`] is produced by a scanner and never mutated afterwards.
//! Its payload carries whatever the remote request needs: either the
//! source image itself (describe mode) or the keywords to render
//! (generate mode).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ItemId;

/// Asset type used when a description does not name one.
pub const DEFAULT_ASSET_TYPE: &str = "sprite";

/// One asset to describe or generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity, used as the cache key.
    pub id: ItemId,
    /// File the item was scanned from.
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    /// SHA-256 hex digest of the source bytes at scan time.
    pub fingerprint: String,
    pub payload: ItemPayload,
}

/// Mode-specific request material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPayload {
    /// The source file is an image to be described.
    Image,
    /// The source file is a description to be rendered.
    Description {
        keywords: Vec<String>,
        asset_type: String,
        /// File name the rendered image is saved under.
        target_file: String,
    },
}

impl Item {
    /// Native `(width, height)` of the item.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Human-readable `WxH` label for logs.
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// File name of the item's source.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }

    /// Keywords joined for prompt text; empty for image items.
    pub fn keywords_text(&self) -> String {
        match &self.payload {
            ItemPayload::Image => String::new(),
            ItemPayload::Description { keywords, .. } => keywords.join(", "),
        }
    }

    /// Declared asset type, falling back to [`DEFAULT_ASSET_TYPE`].
    pub fn asset_type(&self) -> &str {
        match &self.payload {
            ItemPayload::Description { asset_type, .. } if !asset_type.is_empty() => asset_type,
            _ => DEFAULT_ASSET_TYPE,
        }
    }
}
