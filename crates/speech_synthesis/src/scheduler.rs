//! Batch scheduling
//!
//! Runs many jobs through a shared [`FallbackChain`] with a global ceiling on
//! how many synthesize at once. Every submitted job yields exactly one
//! [`JobReport`], whether it succeeded, failed, panicked or was cancelled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::SynthesisConfig;
use crate::error::SpeechError;
use crate::fallback::FallbackChain;
use crate::types::{BatchJob, BatchSummary, JobId, JobReport, SynthesisFailure};

/// Global limit on concurrent synthesis
///
/// Shared by every worker of a batch; a job holds one permit for its whole
/// run, retries and fallbacks included.
#[derive(Debug, Clone)]
pub struct ConcurrencyBudget {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyBudget {
    /// Budget allowing `limit` concurrent jobs (at least 1)
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Configured ceiling
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Permits not currently held
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit
    ///
    /// # Errors
    ///
    /// Returns `SpeechError::Cancelled` if the budget was closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SpeechError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SpeechError::Cancelled)
    }
}

/// Runs batches of jobs under a [`ConcurrencyBudget`]
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    budget: ConcurrencyBudget,
    max_jitter: Duration,
}

struct PendingJob {
    position: usize,
    job_id: JobId,
    destination: PathBuf,
}

impl BatchScheduler {
    /// Scheduler running at most `concurrency_limit` jobs at once
    #[must_use]
    pub fn new(concurrency_limit: usize, max_jitter: Duration) -> Self {
        Self {
            budget: ConcurrencyBudget::new(concurrency_limit),
            max_jitter,
        }
    }

    /// Scheduler from configuration
    #[must_use]
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(
            config.concurrency_limit,
            Duration::from_millis(config.max_jitter_ms),
        )
    }

    /// The shared budget
    #[must_use]
    pub const fn budget(&self) -> &ConcurrencyBudget {
        &self.budget
    }

    fn start_jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Run every job and return one report per job, in submission order
    ///
    /// A failing or panicking job never affects the others. Once `cancel`
    /// fires, jobs not yet started are reported as cancelled and running
    /// jobs stop at their next cancellation point.
    #[instrument(skip_all, fields(jobs = jobs.len(), limit = self.budget.limit()))]
    pub async fn run_batch(
        &self,
        jobs: Vec<BatchJob>,
        chain: Arc<FallbackChain>,
        cancel: &CancellationToken,
    ) -> Vec<JobReport> {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        let mut reports: Vec<(usize, JobReport)> = Vec::with_capacity(jobs.len());

        for (position, job) in jobs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SpeechError::Cancelled),
                permit = self.budget.acquire() => permit,
            };

            let permit = match permit {
                Ok(permit) => permit,
                Err(err) => {
                    reports.push((position, Self::failed_report(&job, &err)));
                    continue;
                },
            };

            let chain = Arc::clone(&chain);
            let cancel = cancel.clone();
            let jitter = self.start_jitter();
            let job_id = job.id.clone();
            let destination = job.request.output_path().to_path_buf();

            let handle = tasks.spawn(async move {
                let _permit = permit;
                if !jitter.is_zero() {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(SynthesisFailure::from_error(&SpeechError::Cancelled, 0));
                        },
                        () = tokio::time::sleep(jitter) => {},
                    }
                }
                debug!(job = %job.id, "Job started");
                chain.run(&job.request, &cancel).await
            });

            pending.insert(
                handle.id(),
                PendingJob {
                    position,
                    job_id,
                    destination,
                },
            );
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(join_err) => {
                    error!(error = %join_err, "Synthesis worker panicked");
                    let failure = SynthesisFailure::from_error(
                        &SpeechError::SynthesisFailed(format!("Worker task failed: {join_err}")),
                        0,
                    );
                    (join_err.id(), Err(failure))
                },
            };

            if let Some(job) = pending.remove(&id) {
                reports.push((
                    job.position,
                    JobReport {
                        job_id: job.job_id,
                        destination: job.destination,
                        outcome,
                    },
                ));
            }
        }

        reports.sort_by_key(|(position, _)| *position);
        let reports: Vec<JobReport> = reports.into_iter().map(|(_, report)| report).collect();

        let summary = BatchSummary::from_reports(&reports);
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            downgraded = summary.downgraded,
            "Batch complete"
        );

        reports
    }

    fn failed_report(job: &BatchJob, err: &SpeechError) -> JobReport {
        JobReport {
            job_id: job.id.clone(),
            destination: job.request.output_path().to_path_buf(),
            outcome: Err(SynthesisFailure::from_error(err, 0)),
        }
    }
}
