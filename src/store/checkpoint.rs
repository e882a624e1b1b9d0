//! Durable partial progress, one record per content hash.
//!
//! A checkpoint is created when the first page of a run completes, rewritten
//! after every further page, and deleted on completion or explicit clear.
//! When a run fails the record is left alone so a later resume continues
//! after the last completed page.
//!
//! The job manager guarantees a single writer per hash; the internal mutex
//! only serialises this process's read-modify-write cycles so a clear never
//! interleaves with an append.

use super::{read_json, read_json_or_absent, record_path, remove_if_exists, write_json_atomic};
use crate::error::BalloonError;
use crate::hash::ContentHash;
use crate::model::{Balloon, Checkpoint};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CheckpointStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("checkpoints"),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn path(&self, hash: &ContentHash) -> PathBuf {
        record_path(&self.dir, hash.as_str(), "json")
    }

    /// Saved progress for `hash`; a record that no longer decodes reads as none.
    pub async fn read(&self, hash: &ContentHash) -> Result<Option<Checkpoint>, BalloonError> {
        read_json_or_absent(&self.path(hash), "checkpoint").await
    }

    /// Record page `page` (1-based) as fully processed.
    ///
    /// Pages must arrive strictly in order: `page` has to be exactly one past
    /// the stored `processed_pages`, and `page == 1` creates the record. This
    /// keeps the record a contiguous prefix of the document.
    pub async fn append(
        &self,
        hash: &ContentHash,
        total_pages: usize,
        page: usize,
        balloons: Vec<Balloon>,
    ) -> Result<Checkpoint, BalloonError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path(hash);

        let mut checkpoint = match read_json::<Checkpoint>(&path).await? {
            Some(cp) => cp,
            None => Checkpoint {
                hash: hash.clone(),
                processed_pages: 0,
                total_pages,
                balloons_so_far: Vec::new(),
                last_update: Utc::now(),
            },
        };

        if checkpoint.total_pages != total_pages {
            return Err(BalloonError::Internal(format!(
                "checkpoint for {} expects {} pages, run reports {}",
                hash.short(),
                checkpoint.total_pages,
                total_pages
            )));
        }
        if page != checkpoint.processed_pages + 1 || page > total_pages {
            return Err(BalloonError::Internal(format!(
                "out-of-order checkpoint append for {}: page {} after {}/{}",
                hash.short(),
                page,
                checkpoint.processed_pages,
                total_pages
            )));
        }

        checkpoint.processed_pages = page;
        checkpoint.balloons_so_far.extend(balloons);
        checkpoint.last_update = Utc::now();

        write_json_atomic(&path, &checkpoint).await?;
        debug!(
            hash = %hash.short(),
            page,
            total_pages,
            balloons = checkpoint.balloons_so_far.len(),
            "Checkpoint updated"
        );
        Ok(checkpoint)
    }

    /// Delete the checkpoint. Clearing an absent checkpoint is not an error.
    pub async fn clear(&self, hash: &ContentHash) -> Result<(), BalloonError> {
        let _guard = self.write_lock.lock().await;
        if remove_if_exists(&self.path(hash)).await? {
            debug!(hash = %hash.short(), "Checkpoint cleared");
        }
        Ok(())
    }
}
