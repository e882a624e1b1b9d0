//! The per-job page loop.
//!
//! ```text
//! for page in from_page..=total:
//!     cancelled? ──▶ stop (checkpoint keeps pages < page)
//!     render ─▶ store JPEG ─▶ detect ─▶ append checkpoint ─▶ publish progress
//! finalize cache entry ─▶ clear checkpoint ─▶ complete
//! ```
//!
//! The checkpoint append is the commit point of a page. Cancellation is
//! checked before each page and also interrupts an in-flight render or
//! detection, in which case the page is simply not committed.

use super::Shared;
use crate::error::{BalloonError, ErrorKind, PageError};
use crate::hash::ContentHash;
use crate::model::Balloon;
use crate::progress::{JobState, ProgressRecord};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

pub(super) struct RunContext {
    pub shared: Arc<Shared>,
    pub record: Arc<ProgressRecord>,
    pub cancel: CancellationToken,
    pub hash: ContentHash,
    pub pdf_path: PathBuf,
    pub from_page: usize,
    pub total_pages: usize,
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Engine(#[from] BalloonError),
}

impl RunError {
    fn kind(&self) -> ErrorKind {
        match self {
            RunError::Page(e) => e.kind(),
            RunError::Engine(e) => e.kind(),
        }
    }
}

enum Outcome {
    Complete { detections: usize },
    Cancelled { processed: usize },
}

pub(super) async fn run_job(ctx: RunContext) {
    let span = info_span!("job", job_id = %ctx.record.job_id(), hash = %ctx.hash.short());
    async move {
        match process(&ctx).await {
            Ok(Outcome::Complete { detections }) => {
                ctx.record.complete(detections);
                info!(detections, pages = ctx.total_pages, "Job complete");
            }
            Ok(Outcome::Cancelled { processed }) => {
                let reason = ctx
                    .record
                    .cancel_reason()
                    .unwrap_or_else(|| "Cancelled".to_string());
                ctx.record.finish(
                    JobState::Cancelled,
                    format!("{reason} after {processed}/{} pages", ctx.total_pages),
                );
                info!(processed, "Job cancelled");
            }
            Err(e) => {
                error!(kind = ?e.kind(), "Job failed: {}", e);
                ctx.record.finish(JobState::Error, e.to_string());
            }
        }
    }
    .instrument(span)
    .await
}

async fn process(ctx: &RunContext) -> Result<Outcome, RunError> {
    let shared = &ctx.shared;
    ctx.record.mark_running(format!(
        "Processing pages {}-{}",
        ctx.from_page, ctx.total_pages
    ));

    if ctx.from_page == 1 {
        shared.checkpoints.clear(&ctx.hash).await?;
    }

    for page in ctx.from_page..=ctx.total_pages {
        if ctx.cancel.is_cancelled() {
            return Ok(Outcome::Cancelled { processed: page - 1 });
        }
        ctx.record
            .set_message(format!("Processing page {}/{}", page, ctx.total_pages));

        let balloons = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Ok(Outcome::Cancelled { processed: page - 1 });
            }
            result = read_page(ctx, page) => result?,
        };

        let found = balloons.len();
        shared
            .checkpoints
            .append(&ctx.hash, ctx.total_pages, page, balloons)
            .await?;
        ctx.record.page_done(page, found);
        debug!(page, balloons = found, "Page committed");
    }

    let checkpoint = shared
        .checkpoints
        .read(&ctx.hash)
        .await?
        .ok_or_else(|| {
            BalloonError::Internal(format!("checkpoint for {} vanished before finalize", ctx.hash.short()))
        })?;

    let entry = shared
        .cache
        .finalize(&ctx.hash, ctx.total_pages, checkpoint.balloons_so_far)
        .await?;
    shared.checkpoints.clear(&ctx.hash).await?;

    Ok(Outcome::Complete {
        detections: entry.detections.len(),
    })
}

/// Render, store and read one page. Nothing durable about the page's
/// balloons is written here.
async fn read_page(ctx: &RunContext, page: usize) -> Result<Vec<Balloon>, RunError> {
    let shared = &ctx.shared;
    let image = shared.renderer.render_page(&ctx.pdf_path, page).await?;
    shared
        .documents
        .save_page_image(&ctx.hash, page, &image, shared.jpeg_quality)
        .await?;

    let detections = shared.detector.detect(page, &image).await?;
    let (image_width, image_height) = (image.width(), image.height());

    Ok(detections
        .into_iter()
        .map(|d| Balloon {
            balloon_number: d.balloon_number,
            page,
            bbox: d.bbox,
            image_width,
            image_height,
        })
        .collect())
}
