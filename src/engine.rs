//! The engine facade: upload-and-decide, resume, progress control, results.
//!
//! ## Upload decision
//!
//! ```text
//! bytes ─▶ validate ─▶ sha256
//!            │
//!            ├─ cache entry and !force_fresh ─────────▶ Cached(summary)
//!            ├─ job running for the hash ─────────────▶ Err(Conflict)
//!            ├─ checkpoint and !force_fresh ──────────▶ Resumable(summary)
//!            └─ store upload ─▶ start fresh job ──────▶ Started{job_id}
//! ```
//!
//! A forced fresh start skips both lookups; the new job discards the old
//! checkpoint once it owns the hash and overwrites the cache entry when it
//! finishes.

use crate::config::EngineConfig;
use crate::error::{BalloonError, ErrorKind};
use crate::hash::ContentHash;
use crate::jobs::JobManager;
use crate::model::{CacheSummary, Checkpoint, CheckpointSummary};
use crate::pipeline::llm::VlmDetector;
use crate::pipeline::render::PdfiumRenderer;
use crate::pipeline::{DetectionPipeline, PageRenderer};
use crate::progress::JobStatus;
use crate::results::{find_occurrences, Occurrence, ResultSet};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PDF_MAGIC: &[u8] = b"%PDF";

/// What an upload led to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Finalized results already exist; nothing was started.
    Cached(CacheSummary),
    /// Partial progress exists; the client chooses resume or fresh.
    Resumable(CheckpointSummary),
    /// A fresh job is processing the drawing.
    Started { job_id: Uuid, hash: ContentHash },
}

/// Side-effect-free cache check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub hash: ContentHash,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CacheSummary>,
}

/// Resumable balloon-detection engine over content-addressed drawings.
#[derive(Debug, Clone)]
pub struct BalloonEngine {
    config: Arc<EngineConfig>,
    jobs: JobManager,
}

impl BalloonEngine {
    /// Engine over explicit page renderer and detection pipeline.
    pub fn new(
        config: EngineConfig,
        renderer: Arc<dyn PageRenderer>,
        detector: Arc<dyn DetectionPipeline>,
    ) -> Self {
        let jobs = JobManager::new(&config, renderer, detector);
        Self {
            config: Arc::new(config),
            jobs,
        }
    }

    /// Engine with the pdfium renderer and the VLM detector.
    pub fn from_config(config: EngineConfig) -> Result<Self, BalloonError> {
        let renderer = Arc::new(PdfiumRenderer::new(&config));
        let detector = Arc::new(VlmDetector::from_config(&config)?);
        Ok(Self::new(config, renderer, detector))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Cheap structural checks run before anything is hashed or stored.
    pub fn validate_upload(&self, bytes: &[u8]) -> Result<(), BalloonError> {
        if bytes.is_empty() {
            return Err(BalloonError::InvalidInput {
                reason: "upload is empty".into(),
            });
        }
        if bytes.len() > self.config.max_upload_bytes {
            return Err(BalloonError::UploadTooLarge {
                size: bytes.len(),
                max: self.config.max_upload_bytes,
            });
        }
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(BalloonError::NotAPdf {
                magic: bytes.iter().take(8).copied().collect(),
            });
        }
        Ok(())
    }

    /// Decide between cached results, a resume offer, and a fresh job.
    pub async fn upload(
        &self,
        bytes: &[u8],
        session: &SessionId,
        force_fresh: bool,
    ) -> Result<UploadOutcome, BalloonError> {
        self.validate_upload(bytes)?;
        let hash = ContentHash::compute(bytes);
        debug!(hash = %hash.short(), bytes = bytes.len(), %session, force_fresh, "Upload received");

        if !force_fresh {
            if let Some(entry) = self.jobs.cache().lookup(&hash).await? {
                info!(hash = %hash.short(), "Cache hit");
                return Ok(UploadOutcome::Cached(entry.summary()));
            }
        }

        if let Some(job_id) = self.jobs.active_job_for(&hash) {
            return Err(BalloonError::Conflict {
                hash: hash.to_string(),
                job_id: job_id.to_string(),
            });
        }

        if !force_fresh {
            if let Some(checkpoint) = self.jobs.checkpoints().read(&hash).await? {
                info!(
                    hash = %hash.short(),
                    processed = checkpoint.processed_pages,
                    total = checkpoint.total_pages,
                    "Resumable progress found"
                );
                return Ok(UploadOutcome::Resumable(checkpoint.summary()));
            }
        }

        self.jobs.documents().save_upload(&hash, bytes).await?;
        match self.jobs.start(hash.clone(), session).await {
            Ok(job_id) => Ok(UploadOutcome::Started { job_id, hash }),
            Err(e) => {
                if e.kind() == ErrorKind::InvalidInput {
                    warn!(hash = %hash.short(), "Discarding unusable upload: {}", e);
                    self.jobs.documents().remove_upload(&hash).await?;
                }
                Err(e)
            }
        }
    }

    /// Report whether results exist for these bytes. Stores nothing.
    pub async fn probe(&self, bytes: &[u8]) -> Result<ProbeOutcome, BalloonError> {
        if bytes.len() > self.config.max_upload_bytes {
            return Err(BalloonError::UploadTooLarge {
                size: bytes.len(),
                max: self.config.max_upload_bytes,
            });
        }
        let hash = ContentHash::compute(bytes);
        let summary = self.jobs.cache().lookup(&hash).await?.map(|e| e.summary());
        Ok(ProbeOutcome {
            cached: summary.is_some(),
            hash,
            summary,
        })
    }

    /// Continue from the saved checkpoint for these bytes.
    pub async fn resume(&self, bytes: &[u8], session: &SessionId) -> Result<Uuid, BalloonError> {
        self.validate_upload(bytes)?;
        let hash = ContentHash::compute(bytes);
        if self.jobs.checkpoints().read(&hash).await?.is_none() {
            return Err(BalloonError::CheckpointNotFound {
                hash: hash.to_string(),
            });
        }
        self.jobs.documents().save_upload(&hash, bytes).await?;
        self.jobs.resume(hash, session).await
    }

    pub fn status(&self, job_id: Uuid) -> Result<JobStatus, BalloonError> {
        self.jobs.status(job_id)
    }

    /// Idempotent cancel; see [`JobManager::cancel`].
    pub fn cancel(&self, job_id: Uuid, requester: Option<&SessionId>) -> bool {
        self.jobs.cancel(job_id, requester)
    }

    /// Discard saved progress. Refused while a job owns the hash.
    pub async fn clear_progress(&self, hash: &ContentHash) -> Result<(), BalloonError> {
        self.jobs.clear_checkpoint(hash).await?;
        info!(hash = %hash.short(), "Progress cleared");
        Ok(())
    }

    /// Balloons accumulated so far for a drawing that is being processed or
    /// was interrupted. `None` once finalized or cleared.
    pub async fn progress(&self, hash: &ContentHash) -> Result<Option<Checkpoint>, BalloonError> {
        self.jobs.checkpoints().read(hash).await
    }

    /// The stored upload, as served back to the results UI.
    pub async fn drawing(&self, hash: &ContentHash) -> Result<Vec<u8>, BalloonError> {
        self.jobs
            .documents()
            .read_upload(hash)
            .await?
            .ok_or_else(|| BalloonError::DrawingNotFound {
                hash: hash.to_string(),
            })
    }

    pub async fn results(&self, hash: &ContentHash) -> Result<ResultSet, BalloonError> {
        let entry = self
            .jobs
            .cache()
            .lookup(hash)
            .await?
            .ok_or_else(|| BalloonError::ResultNotFound {
                hash: hash.to_string(),
            })?;
        let pages = self.jobs.documents().list_page_images(hash).await?;
        Ok(ResultSet::new(entry, pages))
    }

    /// Stored raster names for a drawing, in page order.
    pub async fn page_images(&self, hash: &ContentHash) -> Result<Vec<String>, BalloonError> {
        self.jobs.documents().list_page_images(hash).await
    }

    /// JPEG bytes of one stored page raster.
    pub async fn page_image(&self, hash: &ContentHash, page: usize) -> Result<Vec<u8>, BalloonError> {
        if let Some(entry) = self.jobs.cache().lookup(hash).await? {
            if page == 0 || page > entry.page_count {
                return Err(BalloonError::PageOutOfRange {
                    page,
                    total: entry.page_count,
                });
            }
        }
        self.jobs
            .documents()
            .read_page_image(hash, page)
            .await?
            .ok_or_else(|| BalloonError::ResultNotFound {
                hash: format!("{hash} (page {page})"),
            })
    }

    /// Checklist join: where does `find_number` appear on this drawing?
    pub async fn find(
        &self,
        hash: &ContentHash,
        find_number: &str,
    ) -> Result<Vec<Occurrence>, BalloonError> {
        let entry = self
            .jobs
            .cache()
            .lookup(hash)
            .await?
            .ok_or_else(|| BalloonError::ResultNotFound {
                hash: hash.to_string(),
            })?;
        Ok(find_occurrences(&entry.detections, find_number))
    }

    pub fn session_status(&self, session: &SessionId) -> Option<JobStatus> {
        self.jobs.session_job(session)
    }

    /// Run the job reaper at the configured interval until `shutdown`.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.jobs.spawn_reaper(self.config.reap_interval, shutdown)
    }
}
