use std::time::Duration;

use tracing::{info, info_span, warn, Instrument};

use super::{ImportJob, ImportOrchestrator};
use crate::error::ImportError;
use crate::import::ImportSummary;

/// Attempt budget, per-attempt ceiling and the waits between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub tries: u32,
    /// Wait after failed attempt `n` is `backoff[n - 1]`; the last entry
    /// repeats if the schedule is shorter than the budget.
    pub backoff: Vec<Duration>,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        summary: ImportSummary,
        attempts: u32,
    },
    Failed {
        error: ImportError,
        attempts: u32,
    },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JobOutcome::Completed { attempts, .. } | JobOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Runs `job` until it completes, hits a non-retryable error or exhausts
/// the budget. Every attempt repeats the whole sequence; the failure hook
/// runs once, after the last attempt.
pub async fn run_with_retry(
    orchestrator: &ImportOrchestrator,
    job: &ImportJob,
    policy: &RetryPolicy,
) -> JobOutcome {
    let ctx = job.context();
    let tries = policy.tries.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let span = info_span!("import_attempt", file_name = %ctx.file_name, attempt);
        let result = match tokio::time::timeout(
            policy.timeout,
            orchestrator.run_attempt(job, attempt),
        )
        .instrument(span)
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ImportError::Timeout {
                limit: policy.timeout,
            }),
        };

        match result {
            Ok(summary) => {
                info!(file_name = %ctx.file_name, attempt, "job completed");
                return JobOutcome::Completed {
                    summary,
                    attempts: attempt,
                };
            }
            Err(err) if err.is_retryable() && attempt < tries => {
                let delay = policy.delay_after(attempt);
                warn!(
                    file_name = %ctx.file_name,
                    attempt,
                    tries,
                    kind = err.kind(),
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "import attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                orchestrator.on_failure(&ctx, &err).await;
                return JobOutcome::Failed {
                    error: err,
                    attempts: attempt,
                };
            }
        }
    }
}
