//! Content-addressed store of finalized result sets.
//!
//! Entries are global by hash: identical drawing content shares one entry
//! regardless of which session produced it. An entry only changes when a
//! later run for the same hash finalizes again (forced fresh runs overwrite).

use super::{read_json_or_absent, record_path, write_json_atomic};
use crate::error::BalloonError;
use crate::hash::ContentHash;
use crate::model::{Balloon, CacheEntry};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("cache"),
        }
    }

    fn path(&self, hash: &ContentHash) -> PathBuf {
        record_path(&self.dir, hash.as_str(), "json")
    }

    /// The finalized entry for `hash`. An entry that no longer decodes is
    /// reported as absent, so the drawing is simply processed again.
    pub async fn lookup(&self, hash: &ContentHash) -> Result<Option<CacheEntry>, BalloonError> {
        read_json_or_absent(&self.path(hash), "cache entry").await
    }

    /// Write the finalized entry for `hash`, replacing any previous one.
    pub async fn finalize(
        &self,
        hash: &ContentHash,
        page_count: usize,
        detections: Vec<Balloon>,
    ) -> Result<CacheEntry, BalloonError> {
        let entry = CacheEntry {
            hash: hash.clone(),
            page_count,
            detections,
            created_at: Utc::now(),
        };
        write_json_atomic(&self.path(hash), &entry).await?;
        info!(
            hash = %hash.short(),
            pages = page_count,
            detections = entry.detections.len(),
            "Cache entry finalized"
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BBox;
    use tempfile::TempDir;

    fn balloon(n: &str, page: usize) -> Balloon {
        Balloon {
            balloon_number: n.into(),
            page,
            bbox: BBox::new(1, 1, 5, 5),
            image_width: 10,
            image_height: 10,
        }
    }

    #[tokio::test]
    async fn lookup_absent_then_present() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let h = ContentHash::compute(b"drawing");

        assert!(store.lookup(&h).await.unwrap().is_none());
        store.finalize(&h, 2, vec![balloon("4", 1)]).await.unwrap();

        let entry = store.lookup(&h).await.unwrap().unwrap();
        assert_eq!(entry.page_count, 2);
        assert_eq!(entry.detections, vec![balloon("4", 1)]);
        // Repeated lookups keep returning it.
        assert_eq!(store.lookup(&h).await.unwrap().unwrap(), entry);
    }

    #[tokio::test]
    async fn finalize_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let h = ContentHash::compute(b"drawing");

        store.finalize(&h, 1, vec![balloon("1", 1)]).await.unwrap();
        store
            .finalize(&h, 1, vec![balloon("1", 1), balloon("2", 1)])
            .await
            .unwrap();
        assert_eq!(store.lookup(&h).await.unwrap().unwrap().detections.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let h = ContentHash::compute(b"drawing");
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(store.path(&h), b"{torn").unwrap();

        assert!(store.lookup(&h).await.unwrap().is_none());
        store.finalize(&h, 1, vec![]).await.unwrap();
        assert_eq!(store.lookup(&h).await.unwrap().unwrap().page_count, 1);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let h = ContentHash::compute(b"drawing");
        CacheStore::new(dir.path())
            .finalize(&h, 3, vec![])
            .await
            .unwrap();
        let reopened = CacheStore::new(dir.path());
        assert_eq!(reopened.lookup(&h).await.unwrap().unwrap().page_count, 3);
    }
}
