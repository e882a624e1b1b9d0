//! Background sweep over the job table.
//!
//! Two rules, both measured on the monotonic clock:
//! - a job still active after `max_run_duration` is cancelled;
//! - a finished job is forgotten `status_retention` after it finished,
//!   after which its id answers `JobNotFound`.

use super::JobManager;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub timed_out: usize,
    pub forgotten: usize,
}

impl JobManager {
    pub fn reap(&self) -> ReapReport {
        self.reap_at(Instant::now())
    }

    /// Sweep as if the current time were `now`.
    pub fn reap_at(&self, now: Instant) -> ReapReport {
        let max_run = self.shared.max_run_duration;
        let retention = self.shared.status_retention;
        let mut report = ReapReport::default();
        let mut forgotten: Vec<Uuid> = Vec::new();

        self.shared.write_jobs().retain(|job_id, handle| {
            match handle.record.finished_instant() {
                Some(done) if now.saturating_duration_since(done) >= retention => {
                    forgotten.push(*job_id);
                    false
                }
                Some(_) => true,
                None => {
                    let age = now.saturating_duration_since(handle.record.started_instant());
                    if age >= max_run
                        && !handle.cancel.is_cancelled()
                        && handle.signal_cancel("Exceeded maximum run duration")
                    {
                        info!(%job_id, ?age, "Job exceeded maximum run duration");
                        report.timed_out += 1;
                    }
                    true
                }
            }
        });

        for job_id in &forgotten {
            self.shared.sessions.forget_job(*job_id);
        }
        report.forgotten = forgotten.len();

        if report != ReapReport::default() {
            debug!(
                timed_out = report.timed_out,
                forgotten = report.forgotten,
                "Reaper sweep"
            );
        }
        report
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn spawn_reaper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.reap();
                    }
                }
            }
            debug!("Reaper stopped");
        })
    }
}
