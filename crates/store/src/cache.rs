//! Content-addressed incremental cache.
//!
//! The index maps item identity to the fingerprint it had when its
//! output was last written. An item is skipped only when its record
//! matches the current fingerprint *and* the output still exists;
//! anything else (no record, changed bytes, deleted output, damaged
//! index) sends it back for processing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spritebatch_core::item::Item;
use spritebatch_core::types::ItemId;

use crate::error::StoreError;
use crate::record::{read_json_or_default, write_json_atomic};
use crate::storage::Storage;

/// Persisted state for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Fingerprint of the source when its output was written.
    pub hash: String,
    pub processed: bool,
}

type CacheIndex = BTreeMap<ItemId, CacheRecord>;

/// Decides which items need work and records completed ones.
pub struct ContentCache {
    index_path: PathBuf,
    records: CacheIndex,
    storage: Arc<dyn Storage>,
    force: bool,
}

impl ContentCache {
    /// Load the index at `index_path`. A missing or corrupt index is empty.
    pub fn open(index_path: impl Into<PathBuf>, storage: Arc<dyn Storage>, force: bool) -> Self {
        let index_path = index_path.into();
        let records: CacheIndex = read_json_or_default(&index_path);
        tracing::debug!(
            path = %index_path.display(),
            records = records.len(),
            force,
            "Content cache loaded",
        );
        Self {
            index_path,
            records,
            storage,
            force,
        }
    }

    /// Whether `item` must be (re)processed. Has no side effects.
    pub fn needs_work(&self, item: &Item) -> bool {
        if self.force {
            return true;
        }
        match self.records.get(&item.id) {
            Some(record) if record.processed && record.hash == item.fingerprint => {
                !self.storage.output_exists(item)
            }
            _ => true,
        }
    }

    /// Record `item` as done. Call only after its output is durably written.
    ///
    /// Re-reads the index from disk, applies the update and rewrites the
    /// whole index atomically.
    pub fn mark_done(&mut self, item: &Item) -> Result<(), StoreError> {
        let mut records: CacheIndex = read_json_or_default(&self.index_path);
        records.insert(
            item.id.clone(),
            CacheRecord {
                hash: item.fingerprint.clone(),
                processed: true,
            },
        );
        write_json_atomic(&self.index_path, &records)?;
        self.records = records;
        Ok(())
    }

    /// Current record for an item, if any.
    pub fn record(&self, id: &str) -> Option<&CacheRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Storage the cache checks outputs against.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsStorage, OutputRule};
    use spritebatch_core::item::ItemPayload;

    struct Fixture {
        dir: tempfile::TempDir,
        storage: Arc<dyn Storage>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                storage: Arc::new(FsStorage::new(OutputRule::ReplaceExtension("json".into()))),
            }
        }

        fn index(&self) -> PathBuf {
            self.dir.path().join(".progress.json")
        }

        fn item(&self, name: &str, fingerprint: &str) -> Item {
            Item {
                id: name.into(),
                source: self.dir.path().join(name),
                width: 16,
                height: 16,
                fingerprint: fingerprint.into(),
                payload: ItemPayload::Image,
            }
        }

        fn write_output(&self, item: &Item) {
            self.storage.write_output(item, b"{}").unwrap();
        }
    }

    #[test]
    fn unknown_item_needs_work() {
        let fx = Fixture::new();
        let cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        assert!(cache.needs_work(&fx.item("a.png", "h1")));
    }

    #[test]
    fn done_item_with_output_is_skipped() {
        let fx = Fixture::new();
        let item = fx.item("a.png", "h1");
        fx.write_output(&item);

        let mut cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        cache.mark_done(&item).unwrap();
        assert!(!cache.needs_work(&item));

        // survives reopen
        let reopened = ContentCache::open(fx.index(), fx.storage.clone(), false);
        assert!(!reopened.needs_work(&item));
    }

    #[test]
    fn changed_fingerprint_needs_work() {
        let fx = Fixture::new();
        let item = fx.item("a.png", "h1");
        fx.write_output(&item);
        let mut cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        cache.mark_done(&item).unwrap();

        assert!(cache.needs_work(&fx.item("a.png", "h2")));
    }

    #[test]
    fn missing_output_needs_work() {
        let fx = Fixture::new();
        let item = fx.item("a.png", "h1");
        let mut cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        cache.mark_done(&item).unwrap();

        assert!(cache.needs_work(&item));
    }

    #[test]
    fn force_bypasses_cache() {
        let fx = Fixture::new();
        let item = fx.item("a.png", "h1");
        fx.write_output(&item);
        ContentCache::open(fx.index(), fx.storage.clone(), false)
            .mark_done(&item)
            .unwrap();

        let forced = ContentCache::open(fx.index(), fx.storage.clone(), true);
        assert!(forced.is_forced());
        assert!(forced.needs_work(&item));
    }

    #[test]
    fn corrupt_index_fails_open() {
        let fx = Fixture::new();
        let item = fx.item("a.png", "h1");
        fx.write_output(&item);
        std::fs::write(fx.index(), b"\x00\x01not json").unwrap();

        let mut cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        assert!(cache.is_empty());
        assert!(cache.needs_work(&item));

        cache.mark_done(&item).unwrap();
        assert!(!cache.needs_work(&item));
    }

    #[test]
    fn mark_done_merges_with_index_on_disk() {
        let fx = Fixture::new();
        let a = fx.item("a.png", "ha");
        let b = fx.item("b.png", "hb");

        let mut first = ContentCache::open(fx.index(), fx.storage.clone(), false);
        let mut second = ContentCache::open(fx.index(), fx.storage.clone(), false);
        first.mark_done(&a).unwrap();
        second.mark_done(&b).unwrap();

        let reopened = ContentCache::open(fx.index(), fx.storage.clone(), false);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.record("a.png").unwrap().hash, "ha");
    }

    #[test]
    fn index_format_is_keyed_by_identity() {
        let fx = Fixture::new();
        let mut cache = ContentCache::open(fx.index(), fx.storage.clone(), false);
        cache.mark_done(&fx.item("tiles/a.png", "abc")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(fx.index()).unwrap()).unwrap();
        assert_eq!(raw["tiles/a.png"]["hash"], "abc");
        assert_eq!(raw["tiles/a.png"]["processed"], true);
    }
}
