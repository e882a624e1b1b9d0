//! Job state machine and the shared status record pollers read.
//!
//! A running job reports progress by writing into its [`ProgressRecord`];
//! status queries take a snapshot of the same record. Both sides hold the
//! lock only for a field copy, so a poll never waits on page processing.
//!
//! ```text
//! queued ──▶ running ──▶ complete
//!    │          ├──────▶ cancelled
//!    │          └──────▶ error
//!    └──────────────────▶ cancelled | error
//! ```
//!
//! Terminal states are final: [`ProgressRecord::finish`] refuses to leave
//! them, so the first terminal transition wins.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Cancelled,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Cancelled | JobState::Error)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Queued => next != JobState::Queued,
            JobState::Running => next.is_terminal(),
            JobState::Complete | JobState::Cancelled | JobState::Error => false,
        }
    }
}

/// Point-in-time view of a job, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub hash: ContentHash,
    pub state: JobState,
    pub processed_pages: usize,
    pub total_pages: usize,
    pub progress_percent: f32,
    pub message: String,
    /// First page this run processes (`> 1` for a resume).
    pub from_page: usize,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once complete: balloons in the finalized result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    state: JobState,
    processed_pages: usize,
    total_pages: usize,
    message: String,
    cancel_requested: bool,
    cancel_reason: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    finished_instant: Option<Instant>,
    detections: Option<usize>,
}

/// Lock-protected progress of one job, shared between its run task and pollers.
#[derive(Debug)]
pub struct ProgressRecord {
    job_id: Uuid,
    hash: ContentHash,
    from_page: usize,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    inner: RwLock<Inner>,
}

impl ProgressRecord {
    /// A queued job that will process `from_page..=total_pages`.
    pub fn new(job_id: Uuid, hash: ContentHash, from_page: usize, total_pages: usize) -> Self {
        Self {
            job_id,
            hash,
            from_page,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            inner: RwLock::new(Inner {
                state: JobState::Queued,
                processed_pages: from_page.saturating_sub(1).min(total_pages),
                total_pages,
                message: "Queued".to_string(),
                cancel_requested: false,
                cancel_reason: None,
                finished_at: None,
                finished_instant: None,
                detections: None,
            }),
        }
    }

    // A panic while holding the lock cannot leave these plain fields
    // half-written, so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn state(&self) -> JobState {
        self.read().state
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn started_instant(&self) -> Instant {
        self.started_instant
    }

    pub fn finished_instant(&self) -> Option<Instant> {
        self.read().finished_instant
    }

    pub fn snapshot(&self) -> JobStatus {
        let inner = self.read();
        let progress_percent = match inner.state {
            JobState::Complete => 100.0,
            _ if inner.total_pages == 0 => 0.0,
            _ => (inner.processed_pages as f32 / inner.total_pages as f32 * 100.0).min(100.0),
        };
        JobStatus {
            job_id: self.job_id,
            hash: self.hash.clone(),
            state: inner.state,
            processed_pages: inner.processed_pages,
            total_pages: inner.total_pages,
            progress_percent,
            message: inner.message.clone(),
            from_page: self.from_page,
            cancel_requested: inner.cancel_requested,
            started_at: self.started_at,
            finished_at: inner.finished_at,
            detections: inner.detections,
        }
    }

    /// `queued → running`. Returns false if the job already left `queued`.
    pub fn mark_running(&self, message: impl Into<String>) -> bool {
        let mut inner = self.write();
        if inner.state != JobState::Queued {
            return false;
        }
        inner.state = JobState::Running;
        inner.message = message.into();
        true
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let mut inner = self.write();
        if !inner.state.is_terminal() {
            inner.message = message.into();
        }
    }

    /// Record that `page` is fully processed and checkpointed.
    pub fn page_done(&self, page: usize, balloons_on_page: usize) {
        let mut inner = self.write();
        if inner.state.is_terminal() {
            return;
        }
        inner.processed_pages = page.min(inner.total_pages);
        inner.message = format!(
            "Page {}/{}: found {} balloons",
            page, inner.total_pages, balloons_on_page
        );
    }

    /// Flag a pending cancellation. The first reason given is kept.
    pub fn request_cancel(&self, reason: impl Into<String>) {
        let mut inner = self.write();
        if inner.state.is_terminal() {
            return;
        }
        inner.cancel_requested = true;
        if inner.cancel_reason.is_none() {
            inner.cancel_reason = Some(reason.into());
        }
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.read().cancel_reason.clone()
    }

    /// Move into a terminal state. Returns false (and changes nothing) when
    /// the job is already terminal or `state` is not terminal.
    pub fn finish(&self, state: JobState, message: impl Into<String>) -> bool {
        Self::finish_locked(&mut self.write(), state, message.into())
    }

    /// `finish(Complete)` carrying the finalized detection count. Pollers
    /// never see `complete` without the count and full page progress.
    pub fn complete(&self, detections: usize) -> bool {
        let mut inner = self.write();
        let done = Self::finish_locked(
            &mut inner,
            JobState::Complete,
            format!("Processing complete! Found {detections} balloons."),
        );
        if done {
            let total = inner.total_pages;
            inner.detections = Some(detections);
            inner.processed_pages = total;
        }
        done
    }

    fn finish_locked(inner: &mut Inner, state: JobState, message: String) -> bool {
        if !state.is_terminal() || !inner.state.can_transition_to(state) {
            return false;
        }
        inner.state = state;
        inner.message = message;
        inner.finished_at = Some(Utc::now());
        inner.finished_instant = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(from: usize, total: usize) -> ProgressRecord {
        ProgressRecord::new(Uuid::new_v4(), ContentHash::compute(b"x"), from, total)
    }

    #[test]
    fn transitions_table() {
        use JobState::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Complete));
        assert!(!Running.can_transition_to(Queued));
        for t in [Complete, Cancelled, Error] {
            for n in [Queued, Running, Complete, Cancelled, Error] {
                assert!(!t.can_transition_to(n), "{t:?} -> {n:?}");
            }
        }
    }

    #[test]
    fn resume_starts_with_prior_pages_counted() {
        let r = record(3, 5);
        let s = r.snapshot();
        assert_eq!(s.processed_pages, 2);
        assert_eq!(s.state, JobState::Queued);
        assert!((s.progress_percent - 40.0).abs() < 0.01);
    }

    #[test]
    fn progress_follows_pages() {
        let r = record(1, 4);
        assert!(r.mark_running("Running"));
        assert!(!r.mark_running("again"));
        r.page_done(1, 2);
        let s = r.snapshot();
        assert_eq!(s.processed_pages, 1);
        assert_eq!(s.progress_percent, 25.0);
        assert!(s.message.contains("Page 1/4"));
    }

    #[test]
    fn terminal_is_final() {
        let r = record(1, 2);
        r.mark_running("Running");
        assert!(r.finish(JobState::Cancelled, "Cancelled"));
        assert!(!r.finish(JobState::Error, "late error"));
        assert!(!r.complete(3));
        r.page_done(2, 1);
        r.request_cancel("too late");
        let s = r.snapshot();
        assert_eq!(s.state, JobState::Cancelled);
        assert_eq!(s.processed_pages, 0);
        assert_eq!(s.message, "Cancelled");
        assert!(!s.cancel_requested);
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn complete_reports_full_progress() {
        let r = record(1, 3);
        r.mark_running("Running");
        r.page_done(1, 0);
        assert!(r.complete(5));
        let s = r.snapshot();
        assert_eq!(s.progress_percent, 100.0);
        assert_eq!(s.processed_pages, 3);
        assert_eq!(s.detections, Some(5));
    }

    #[test]
    fn completion_is_observed_all_at_once() {
        use std::sync::Arc;

        for _ in 0..50 {
            let r = Arc::new(record(1, 3));
            r.mark_running("Running");
            r.page_done(1, 0);
            let reader = {
                let r = Arc::clone(&r);
                std::thread::spawn(move || loop {
                    let s = r.snapshot();
                    if s.state == JobState::Complete {
                        return s;
                    }
                    std::thread::yield_now();
                })
            };
            assert!(r.complete(4));
            let seen = reader.join().unwrap();
            assert_eq!(seen.detections, Some(4));
            assert_eq!(seen.processed_pages, 3);
        }
    }

    #[test]
    fn first_cancel_reason_wins() {
        let r = record(1, 2);
        r.request_cancel("superseded");
        r.request_cancel("timed out");
        assert!(r.snapshot().cancel_requested);
        assert_eq!(r.cancel_reason().as_deref(), Some("superseded"));
    }

    #[test]
    fn non_terminal_finish_is_rejected() {
        let r = record(1, 1);
        assert!(!r.finish(JobState::Running, "nope"));
        assert_eq!(r.state(), JobState::Queued);
    }
}
