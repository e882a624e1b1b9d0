//! Durable storage under the configured data directory.
//!
//! ```text
//! data/
//!  ├─ cache/<hash>.json         finalized CacheEntry   (immutable per run)
//!  ├─ checkpoints/<hash>.json   partial progress       (one writer per hash)
//!  ├─ uploads/<hash>.pdf        the uploaded drawing
//!  └─ pages/<hash>/page_N.jpg   rendered page rasters
//! ```
//!
//! Every record write goes through [`write_json_atomic`]: the bytes land in a
//! temp file in the same directory and are renamed over the target, so a
//! concurrent reader sees either the old record or the new one, never a torn
//! write.

pub mod cache;
pub mod checkpoint;
pub mod documents;

pub use cache::CacheStore;
pub use checkpoint::CheckpointStore;
pub use documents::DocumentStore;

use crate::error::BalloonError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Atomically replace `path` with `bytes`.
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), BalloonError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| BalloonError::Internal(format!("Write task panicked: {e}")))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), BalloonError> {
    let dir = path
        .parent()
        .ok_or_else(|| BalloonError::Internal(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| BalloonError::storage(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BalloonError::storage(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| BalloonError::storage(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| BalloonError::storage(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| BalloonError::storage(path, e.error))?;
    Ok(())
}

/// Serialise `value` as pretty JSON and write it atomically.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), BalloonError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| BalloonError::Serialization {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    write_atomic(path, bytes).await
}

/// Read a JSON record; a missing file is `Ok(None)`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, BalloonError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BalloonError::storage(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| BalloonError::Serialization {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

/// Like [`read_json`], but a record that no longer decodes is treated as
/// absent. `what` names the record in the warning.
pub(crate) async fn read_json_or_absent<T: DeserializeOwned>(
    path: &Path,
    what: &str,
) -> Result<Option<T>, BalloonError> {
    match read_json(path).await {
        Err(BalloonError::Serialization { path, detail }) => {
            warn!(path = %path.display(), "Ignoring corrupt {}: {}", what, detail);
            Ok(None)
        }
        other => other,
    }
}

/// Remove a file; a missing file is not an error.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool, BalloonError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BalloonError::storage(path, e)),
    }
}

pub(crate) fn record_path(dir: &Path, name: &str, ext: &str) -> PathBuf {
    dir.join(format!("{name}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn atomic_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/record.json");
        write_json_atomic(&path, &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<u32>> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        // No temp files left beside the record.
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let back: Option<Vec<u32>> = read_json(&dir.path().join("nope.json")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = read_json::<Vec<u32>>(&path).await.unwrap_err();
        assert!(matches!(err, BalloonError::Serialization { .. }));
    }

    #[tokio::test]
    async fn corrupt_record_can_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{torn").unwrap();
        let back: Option<Vec<u32>> = read_json_or_absent(&path, "record").await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, b"[]").unwrap();
        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!remove_if_exists(&path).await.unwrap());
    }
}
