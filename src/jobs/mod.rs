//! Job manager: at most one running job per drawing, one active job per session.
//!
//! Starting or resuming a job returns its id immediately; the pages are
//! processed by a spawned task (see [`run`]) that publishes progress into a
//! shared [`ProgressRecord`]. Status queries read that record and never wait
//! on page work.
//!
//! ## Ownership
//!
//! The jobs table is the single authority for "who is processing hash H".
//! The running-job check and the insert happen under one write lock, so two
//! concurrent starts for the same hash cannot both succeed. The winning job's
//! task is then the only writer of H's checkpoint and cache entry.
//!
//! ## Sessions
//!
//! Every job is owned by the session that started it. A session that starts
//! a new job supersedes its previous one (the old job is cancelled), and a
//! cancel carrying a session id is honoured only for that session's own job.

mod reaper;
mod run;

pub use reaper::ReapReport;

use crate::config::EngineConfig;
use crate::error::BalloonError;
use crate::hash::ContentHash;
use crate::pipeline::{DetectionPipeline, PageRenderer};
use crate::progress::{JobState, JobStatus, ProgressRecord};
use crate::session::{SessionId, SessionRegistry};
use crate::store::{CacheStore, CheckpointStore, DocumentStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

struct JobHandle {
    record: Arc<ProgressRecord>,
    owner: SessionId,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Ask the run task to stop before its next page.
    fn signal_cancel(&self, reason: &str) -> bool {
        if !self.record.is_active() {
            return false;
        }
        self.record.request_cancel(reason);
        self.cancel.cancel();
        true
    }
}

pub(crate) struct Shared {
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    // Hashes whose saved progress is being cleared. Only touched while the
    // jobs write lock is held, so a launch never overlaps a clear.
    clearing: Mutex<HashSet<ContentHash>>,
    sessions: SessionRegistry,
    cache: CacheStore,
    checkpoints: CheckpointStore,
    documents: DocumentStore,
    renderer: Arc<dyn PageRenderer>,
    detector: Arc<dyn DetectionPipeline>,
    jpeg_quality: u8,
    max_run_duration: Duration,
    status_retention: Duration,
}

impl Shared {
    // Guards are never held across an await; a poisoned table is still consistent.
    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<Uuid, JobHandle>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, JobHandle>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn clearing(&self) -> MutexGuard<'_, HashSet<ContentHash>> {
        self.clearing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds a hash out of reach of new jobs until dropped.
struct ClearClaim<'a> {
    shared: &'a Shared,
    hash: ContentHash,
}

impl Drop for ClearClaim<'_> {
    fn drop(&mut self) {
        let _jobs = self.shared.write_jobs();
        self.shared.clearing().remove(&self.hash);
    }
}

/// Cheaply cloneable handle to the job table and the stores jobs write to.
#[derive(Clone)]
pub struct JobManager {
    shared: Arc<Shared>,
}

impl JobManager {
    pub fn new(
        config: &EngineConfig,
        renderer: Arc<dyn PageRenderer>,
        detector: Arc<dyn DetectionPipeline>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                clearing: Mutex::new(HashSet::new()),
                sessions: SessionRegistry::new(),
                cache: CacheStore::new(&config.data_dir),
                checkpoints: CheckpointStore::new(&config.data_dir),
                documents: DocumentStore::new(&config.data_dir),
                renderer,
                detector,
                jpeg_quality: config.jpeg_quality,
                max_run_duration: config.max_run_duration,
                status_retention: config.status_retention,
            }),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.shared.checkpoints
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.shared.documents
    }

    /// Start a fresh run over every page of the stored upload for `hash`.
    ///
    /// Any existing checkpoint is discarded once the job owns the hash.
    pub async fn start(&self, hash: ContentHash, session: &SessionId) -> Result<Uuid, BalloonError> {
        let pdf_path = self.shared.documents.upload_path(&hash);
        if !self.shared.documents.has_upload(&hash).await {
            return Err(BalloonError::InvalidInput {
                reason: format!("no stored upload for drawing {}", hash.short()),
            });
        }
        let total_pages = self.shared.renderer.page_count(&pdf_path).await?;
        if total_pages == 0 {
            return Err(BalloonError::InvalidInput {
                reason: "document has no pages".into(),
            });
        }
        self.launch(hash, session, 1, total_pages)
    }

    /// Continue a run from the page after the stored checkpoint.
    pub async fn resume(&self, hash: ContentHash, session: &SessionId) -> Result<Uuid, BalloonError> {
        let checkpoint = self
            .shared
            .checkpoints
            .read(&hash)
            .await?
            .ok_or_else(|| BalloonError::CheckpointNotFound {
                hash: hash.to_string(),
            })?;
        if !self.shared.documents.has_upload(&hash).await {
            return Err(BalloonError::InvalidInput {
                reason: format!("no stored upload for drawing {}", hash.short()),
            });
        }
        self.launch(
            hash,
            session,
            checkpoint.processed_pages + 1,
            checkpoint.total_pages,
        )
    }

    fn launch(
        &self,
        hash: ContentHash,
        session: &SessionId,
        from_page: usize,
        total_pages: usize,
    ) -> Result<Uuid, BalloonError> {
        let job_id = Uuid::new_v4();
        let record = Arc::new(ProgressRecord::new(job_id, hash.clone(), from_page, total_pages));
        let cancel = CancellationToken::new();

        {
            let mut jobs = self.shared.write_jobs();
            if let Some(running) = jobs
                .values()
                .find(|h| h.record.hash() == &hash && h.record.is_active())
            {
                return Err(BalloonError::Conflict {
                    hash: hash.to_string(),
                    job_id: running.record.job_id().to_string(),
                });
            }
            if self.shared.clearing().contains(&hash) {
                return Err(BalloonError::Busy {
                    hash: hash.to_string(),
                    reason: "its saved progress is being cleared".into(),
                });
            }
            jobs.insert(
                job_id,
                JobHandle {
                    record: Arc::clone(&record),
                    owner: session.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        if let Some(previous) = self.shared.sessions.set_active(session, job_id) {
            if self.signal(previous, "Superseded by a newer job from the same session") {
                info!(%session, superseded = %previous, by = %job_id, "Previous session job cancelled");
            }
        }

        info!(
            %job_id,
            hash = %hash.short(),
            %session,
            from_page,
            total_pages,
            "Job started"
        );

        let ctx = run::RunContext {
            shared: Arc::clone(&self.shared),
            pdf_path: self.shared.documents.upload_path(&hash),
            record: Arc::clone(&record),
            cancel,
            hash,
            from_page,
            total_pages,
        };
        let task = tokio::spawn(run::run_job(ctx));
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(%job_id, "Job task aborted: {}", e);
                record.finish(JobState::Error, format!("Job task aborted: {e}"));
            }
        });

        Ok(job_id)
    }

    /// Delete the saved progress for `hash`.
    ///
    /// Refused while a job owns the hash; while the file is being removed no
    /// job can be started or resumed on it.
    pub async fn clear_checkpoint(&self, hash: &ContentHash) -> Result<(), BalloonError> {
        let _claim = self.claim_idle(hash)?;
        self.shared.checkpoints.clear(hash).await
    }

    fn claim_idle(&self, hash: &ContentHash) -> Result<ClearClaim<'_>, BalloonError> {
        let jobs = self.shared.write_jobs();
        if let Some(running) = jobs
            .values()
            .find(|h| h.record.hash() == hash && h.record.is_active())
        {
            return Err(BalloonError::Conflict {
                hash: hash.to_string(),
                job_id: running.record.job_id().to_string(),
            });
        }
        if !self.shared.clearing().insert(hash.clone()) {
            return Err(BalloonError::Busy {
                hash: hash.to_string(),
                reason: "its saved progress is already being cleared".into(),
            });
        }
        Ok(ClearClaim {
            shared: &self.shared,
            hash: hash.clone(),
        })
    }

    /// Non-blocking snapshot of a job's progress.
    pub fn status(&self, job_id: Uuid) -> Result<JobStatus, BalloonError> {
        self.shared
            .read_jobs()
            .get(&job_id)
            .map(|h| h.record.snapshot())
            .ok_or_else(|| BalloonError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Request cancellation. Idempotent: unknown or finished jobs are a no-op.
    ///
    /// With `requester` set, only the owning session's request is honoured.
    /// Returns whether a running job was signalled.
    pub fn cancel(&self, job_id: Uuid, requester: Option<&SessionId>) -> bool {
        let jobs = self.shared.read_jobs();
        let Some(handle) = jobs.get(&job_id) else {
            debug!(%job_id, "Cancel for unknown job ignored");
            return false;
        };
        if let Some(session) = requester {
            if *session != handle.owner {
                debug!(%job_id, %session, "Cancel from non-owning session ignored");
                return false;
            }
        }
        let signalled = handle.signal_cancel("Cancelled by request");
        if signalled {
            info!(%job_id, "Cancellation requested");
        }
        signalled
    }

    fn signal(&self, job_id: Uuid, reason: &str) -> bool {
        self.shared
            .read_jobs()
            .get(&job_id)
            .is_some_and(|h| h.signal_cancel(reason))
    }

    /// Id of the job currently processing `hash`, if any.
    pub fn active_job_for(&self, hash: &ContentHash) -> Option<Uuid> {
        self.shared
            .read_jobs()
            .values()
            .find(|h| h.record.hash() == hash && h.record.is_active())
            .map(|h| h.record.job_id())
    }

    /// Status of the session's most recent job, while it is still tracked.
    pub fn session_job(&self, session: &SessionId) -> Option<JobStatus> {
        let job_id = self.shared.sessions.active_job(session)?;
        self.status(job_id).ok()
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &self.shared.read_jobs().len())
            .field("sessions", &self.shared.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PageError};
    use crate::model::Detection;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::path::Path;
    use tempfile::TempDir;

    /// Two-page document whose pages never finish rendering.
    struct Stalled;

    #[async_trait]
    impl PageRenderer for Stalled {
        async fn page_count(&self, _pdf_path: &Path) -> Result<usize, BalloonError> {
            Ok(2)
        }

        async fn render_page(&self, _pdf_path: &Path, _page: usize) -> Result<DynamicImage, PageError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl DetectionPipeline for Stalled {
        async fn detect(&self, _page: usize, _image: &DynamicImage) -> Result<Vec<Detection>, PageError> {
            Ok(Vec::new())
        }
    }

    fn manager(dir: &TempDir) -> JobManager {
        let config = EngineConfig::builder().data_dir(dir.path()).build().unwrap();
        JobManager::new(&config, Arc::new(Stalled), Arc::new(Stalled))
    }

    #[tokio::test]
    async fn no_job_launches_while_progress_is_cleared() {
        let dir = TempDir::new().unwrap();
        let jobs = manager(&dir);
        let hash = ContentHash::compute(b"drawing");
        let session = SessionId::generate();

        let claim = jobs.claim_idle(&hash).unwrap();
        let err = jobs.launch(hash.clone(), &session, 2, 2).unwrap_err();
        assert!(matches!(err, BalloonError::Busy { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(jobs.claim_idle(&hash).is_err());
        drop(claim);

        let job_id = jobs.launch(hash.clone(), &session, 2, 2).unwrap();
        let err = jobs.clear_checkpoint(&hash).await.unwrap_err();
        assert!(matches!(err, BalloonError::Conflict { .. }), "{err}");
        assert!(jobs.cancel(job_id, Some(&session)));
    }

    #[tokio::test]
    async fn clear_releases_its_claim() {
        let dir = TempDir::new().unwrap();
        let jobs = manager(&dir);
        let hash = ContentHash::compute(b"drawing");

        jobs.clear_checkpoint(&hash).await.unwrap();
        jobs.clear_checkpoint(&hash).await.unwrap();
        assert!(jobs.shared.clearing().is_empty());
    }
}
