//! Page pipeline: the two per-page steps a job drives.
//!
//! ```text
//! upload.pdf ──▶ render ──▶ page raster ──▶ detect ──▶ Vec<Detection>
//!               (pdfium)    (stored JPEG)   (VLM)
//! ```
//!
//! Both steps sit behind traits so the job manager never depends on pdfium or
//! on a network provider directly:
//!
//! 1. [`PageRenderer`]: count pages and rasterise one page at a time;
//!    [`render::PdfiumRenderer`] runs pdfium in `spawn_blocking`.
//! 2. [`DetectionPipeline`]: read the balloons on one page raster. It is
//!    opaque to the engine and assumed deterministic per page; any retry
//!    policy belongs to the implementation ([`llm::VlmDetector`] retries with
//!    exponential backoff).
//!
//! [`encode`] and [`postprocess`] are the VLM detector's request and reply
//! halves.

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;

use crate::error::{BalloonError, PageError};
use crate::model::Detection;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::Path;

/// Rasterises pages of a stored drawing.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages, or an input error when the document cannot be opened.
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, BalloonError>;

    /// Render 1-based `page`.
    async fn render_page(&self, pdf_path: &Path, page: usize) -> Result<DynamicImage, PageError>;
}

/// Reads balloon markers off one rendered page.
#[async_trait]
pub trait DetectionPipeline: Send + Sync {
    /// Detect the balloons on 1-based `page`. Bounding boxes are in the pixel
    /// space of `image`.
    async fn detect(&self, page: usize, image: &DynamicImage) -> Result<Vec<Detection>, PageError>;
}
