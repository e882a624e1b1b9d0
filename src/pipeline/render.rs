//! PDF rasterisation: render one drawing page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state internally and is not safe to call from
//! async contexts. Each call moves onto Tokio's blocking pool so the worker
//! threads serving status polls never stall behind a slow render.
//!
//! ## Why one page per call?
//!
//! Jobs check for cancellation between pages and checkpoint after each one.
//! Rendering page by page keeps a cancellation's latency to one page and
//! means a resumed run never re-renders pages it already finished.

use super::PageRenderer;
use crate::config::EngineConfig;
use crate::error::{BalloonError, PageError};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// [`PageRenderer`] backed by pdfium-render.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self, pdf_path: &Path) -> Result<usize, BalloonError> {
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || page_count_blocking(&path))
            .await
            .map_err(|e| BalloonError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn render_page(&self, pdf_path: &Path, page: usize) -> Result<DynamicImage, PageError> {
        let path = pdf_path.to_path_buf();
        let (dpi, max_pixels) = (self.dpi, self.max_pixels);
        tokio::task::spawn_blocking(move || render_page_blocking(&path, page, dpi, max_pixels))
            .await
            .map_err(|e| PageError::RenderFailed {
                page,
                detail: format!("render task panicked: {e}"),
            })?
    }
}

fn load_error(path: &Path, e: PdfiumError) -> BalloonError {
    BalloonError::CorruptPdf {
        path: path.to_path_buf(),
        detail: format!("{:?}", e),
    }
}

/// Blocking implementation of page counting.
fn page_count_blocking(pdf_path: &Path) -> Result<usize, BalloonError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| load_error(pdf_path, e))?;
    Ok(document.pages().len() as usize)
}

/// Blocking implementation of single-page rendering.
fn render_page_blocking(
    pdf_path: &Path,
    page: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, PageError> {
    let render_err = |detail: String| PageError::RenderFailed { page, detail };

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page == 0 || page > total {
        return Err(render_err(format!("page out of range (document has {total})")));
    }

    let pdf_page = pages
        .get((page - 1) as u16)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    // Points are 1/72 inch.
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| render_err(format!("{:?}", e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page,
        image.width(),
        image.height()
    );
    Ok(image)
}
