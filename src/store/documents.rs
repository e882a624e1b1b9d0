//! Uploaded drawings and their rendered page rasters.
//!
//! The upload is persisted under its content hash before any job starts so
//! the background run, and any resume after a restart, can reopen it without
//! the originating request. Page rasters are what the results UI overlays the
//! balloon boxes on.

use super::{remove_if_exists, write_atomic};
use crate::error::BalloonError;
use crate::hash::ContentHash;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DocumentStore {
    uploads: PathBuf,
    pages: PathBuf,
}

impl DocumentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            uploads: data_dir.join("uploads"),
            pages: data_dir.join("pages"),
        }
    }

    pub fn upload_path(&self, hash: &ContentHash) -> PathBuf {
        self.uploads.join(format!("{hash}.pdf"))
    }

    /// Persist the upload. Content-addressed, so an existing file of the
    /// same size is already the same bytes and is left untouched.
    pub async fn save_upload(&self, hash: &ContentHash, bytes: &[u8]) -> Result<PathBuf, BalloonError> {
        let path = self.upload_path(hash);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() == bytes.len() as u64 {
                return Ok(path);
            }
        }
        write_atomic(&path, bytes.to_vec()).await?;
        debug!(hash = %hash.short(), bytes = bytes.len(), "Upload stored");
        Ok(path)
    }

    pub async fn has_upload(&self, hash: &ContentHash) -> bool {
        tokio::fs::metadata(self.upload_path(hash)).await.is_ok()
    }

    /// Bytes of the stored upload; `Ok(None)` when none is stored.
    pub async fn read_upload(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, BalloonError> {
        read_if_exists(&self.upload_path(hash)).await
    }

    /// Drop a stored upload that turned out to be unusable.
    pub async fn remove_upload(&self, hash: &ContentHash) -> Result<bool, BalloonError> {
        remove_if_exists(&self.upload_path(hash)).await
    }

    fn page_dir(&self, hash: &ContentHash) -> PathBuf {
        self.pages.join(hash.as_str())
    }

    pub fn page_image_name(page: usize) -> String {
        format!("page_{page}.jpg")
    }

    /// Encode `image` as JPEG and store it as the raster for `page`.
    pub async fn save_page_image(
        &self,
        hash: &ContentHash,
        page: usize,
        image: &DynamicImage,
        quality: u8,
    ) -> Result<PathBuf, BalloonError> {
        let path = self.page_dir(hash).join(Self::page_image_name(page));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
            .map_err(|e| BalloonError::Internal(format!("JPEG encoding of page {page}: {e}")))?;
        write_atomic(&path, buf).await?;
        Ok(path)
    }

    /// Names of the stored rasters, ordered by page number.
    pub async fn list_page_images(&self, hash: &ContentHash) -> Result<Vec<String>, BalloonError> {
        let dir = self.page_dir(hash);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BalloonError::storage(&dir, e)),
        };

        let mut pages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BalloonError::storage(&dir, e))?
        {
            if let Some(page) = entry.file_name().to_str().and_then(parse_page_image_name) {
                pages.push(page);
            }
        }
        pages.sort_unstable();
        Ok(pages.into_iter().map(Self::page_image_name).collect())
    }

    /// JPEG bytes of one stored raster; `Ok(None)` when it was never rendered.
    pub async fn read_page_image(
        &self,
        hash: &ContentHash,
        page: usize,
    ) -> Result<Option<Vec<u8>>, BalloonError> {
        read_if_exists(&self.page_dir(hash).join(Self::page_image_name(page))).await
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, BalloonError> {
    match tokio::fs::read(path).await {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BalloonError::storage(path, e)),
    }
}

/// `page_12.jpg` → `Some(12)`.
pub fn parse_page_image_name(name: &str) -> Option<usize> {
    let n = name.strip_prefix("page_")?.strip_suffix(".jpg")?;
    if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    n.parse().ok().filter(|&p| p >= 1)
}
