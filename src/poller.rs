//! Tracks a server-side generation job to a terminal state.
//!
//! One poll fully completes before the next is scheduled; there is never
//! more than one in-flight status request per tracked job. Exhausting the
//! attempt budget is reported as its own outcome, not conflated with a
//! server-declared failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::api::MediaApi;
use crate::models::{GenerationJob, JobState};

/// Failure reason recorded when the attempt budget runs out.
pub const TIMEOUT_REASON: &str = "timeout";

const GENERIC_FAILURE_REASON: &str = "generation failed";

/// Cooperative cancellation handle, consulted before each scheduled poll.
///
/// Cloning yields a handle to the same flag, so the dialog can keep one end
/// while the tracking task holds the other.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cadence and budget for one tracking session.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    /// 5s cadence with 60 attempts, a 5-minute ceiling.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// How a tracking session ended.
#[derive(Debug)]
pub enum TrackOutcome {
    /// Server reported completion; the job carries `result_url`.
    Completed(GenerationJob),
    /// Server reported failure; the job carries `failure_reason`.
    Failed(GenerationJob),
    /// Attempt budget exhausted before a terminal server state was seen.
    TimedOut(GenerationJob),
    /// The caller cancelled; no callback fired after the cancellation point.
    Abandoned,
}

/// Polls the job-status endpoint at a fixed cadence.
pub struct JobPoller<A> {
    api: A,
    config: PollConfig,
}

impl<A: MediaApi> JobPoller<A> {
    pub fn new(api: A, config: PollConfig) -> Self {
        Self { api, config }
    }

    /// Track `job_id` until a terminal state, timeout or cancellation.
    ///
    /// `on_progress` fires exactly once per observed state transition, so a
    /// poll that sees an unchanged state stays silent. A failed status
    /// request consumes an attempt and the cadence continues; the poll loop
    /// itself is the only retry mechanism.
    pub async fn track(
        &self,
        job_id: &str,
        cancel: &CancelFlag,
        mut on_progress: impl FnMut(JobState),
    ) -> TrackOutcome {
        let mut job = GenerationJob::new(job_id);
        log::info!(
            "Tracking job {} ({} attempts at {:?})",
            job_id,
            self.config.max_attempts,
            self.config.interval
        );

        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(self.config.interval).await;

            if cancel.is_cancelled() {
                log::debug!("Job {} abandoned after {} polls", job_id, attempt - 1);
                return TrackOutcome::Abandoned;
            }

            job.attempts_made = attempt;
            let status = match self.api.job_status(job_id).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Status poll {} for job {} failed: {}", attempt, job_id, e);
                    continue;
                }
            };

            if status.state != job.state {
                log::debug!("Job {}: {:?} -> {:?}", job_id, job.state, status.state);
                job.state = status.state;
                on_progress(status.state);
            }

            match status.state {
                JobState::Completed => {
                    match status.result {
                        Some(result) => {
                            job.result_url = Some(result.image_url);
                            return TrackOutcome::Completed(job);
                        }
                        None => {
                            // Completed without a result is unusable.
                            job.failure_reason = Some(GENERIC_FAILURE_REASON.to_string());
                            return TrackOutcome::Failed(job);
                        }
                    }
                }
                JobState::Failed => {
                    job.failure_reason = Some(
                        status
                            .failed_reason
                            .unwrap_or_else(|| GENERIC_FAILURE_REASON.to_string()),
                    );
                    return TrackOutcome::Failed(job);
                }
                JobState::Queued | JobState::Active => {}
            }
        }

        log::warn!(
            "Job {} timed out after {} attempts",
            job_id,
            self.config.max_attempts
        );
        job.failure_reason = Some(TIMEOUT_REASON.to_string());
        TrackOutcome::TimedOut(job)
    }
}
