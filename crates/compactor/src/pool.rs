//! Runs independent compaction jobs in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{CompactionError, CompactionJob, CompactionOutcome, Compactor, JobFailure, JobLedger, JobState};

pub type JobResult = Result<CompactionOutcome, JobFailure>;

/// Fixed set of scoped workers that claim jobs from a shared counter.
///
/// At most `max_concurrent_jobs` jobs run at once. A job whose inputs
/// overlap an earlier job in the same batch is rejected without running.
#[derive(Debug)]
pub struct CompactionPool {
    compactor: Compactor,
    cancel: CancellationToken,
}

impl CompactionPool {
    pub fn new(compactor: Compactor) -> Self {
        Self {
            compactor,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` instead of a private token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token observed by every job run through this pool.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn compactor(&self) -> &Compactor {
        &self.compactor
    }

    /// Runs `jobs` and returns one result per job, in job order.
    pub fn run(&self, jobs: &[CompactionJob]) -> Vec<JobResult> {
        let mut results: Vec<Option<JobResult>> = Vec::with_capacity(jobs.len());
        let mut runnable = Vec::with_capacity(jobs.len());
        let mut claimed: HashMap<(&str, Uuid), usize> = HashMap::new();

        for (i, job) in jobs.iter().enumerate() {
            match first_conflict(&mut claimed, i, job) {
                Some((block_id, owner)) => results.push(Some(Err(rejected(
                    job,
                    format!("block {} already claimed by job {}", block_id, owner),
                )))),
                None => {
                    results.push(None);
                    runnable.push(i);
                }
            }
        }

        let workers = self
            .compactor
            .config()
            .max_concurrent_jobs
            .min(runnable.len());
        info!(jobs = jobs.len(), runnable = runnable.len(), workers, "running compaction jobs");

        let next = AtomicUsize::new(0);
        let slots = Mutex::new(results);
        thread::scope(|s| {
            for worker in 0..workers {
                let next = &next;
                let slots = &slots;
                let runnable = &runnable;
                s.spawn(move || loop {
                    let claim = next.fetch_add(1, Ordering::AcqRel);
                    let Some(&job_idx) = runnable.get(claim) else {
                        break;
                    };
                    debug!(worker, job = job_idx, "job claimed");
                    let result = self.compactor.compact(&jobs[job_idx], &self.cancel);
                    store_result(&slots, job_idx, result);
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(jobs)
            .map(|(result, job)| {
                result.unwrap_or_else(|| Err(rejected(job, "job did not run".to_string())))
            })
            .collect()
    }
}

/// Stores a finished job's result, even if another worker poisoned the lock.
pub(crate) fn store_result(slots: &Mutex<Vec<Option<JobResult>>>, job_idx: usize, result: JobResult) {
    slots.lock().unwrap_or_else(PoisonError::into_inner)[job_idx] = Some(result);
}

/// Registers the job's inputs, or returns the first input an earlier job
/// already owns.
fn first_conflict<'j>(
    claimed: &mut HashMap<(&'j str, Uuid), usize>,
    job_idx: usize,
    job: &'j CompactionJob,
) -> Option<(Uuid, usize)> {
    for &block_id in &job.block_ids {
        if let Some(&owner) = claimed.get(&(job.tenant.as_str(), block_id)) {
            if owner != job_idx {
                return Some((block_id, owner));
            }
        }
    }
    for &block_id in &job.block_ids {
        claimed.insert((job.tenant.as_str(), block_id), job_idx);
    }
    None
}

fn rejected(job: &CompactionJob, reason: String) -> JobFailure {
    let mut ledger = JobLedger::new(job.block_ids.clone());
    ledger.state = JobState::Failed;
    JobFailure {
        tenant: job.tenant.clone(),
        phase: JobState::Loading,
        error: CompactionError::InvalidJob(reason),
        ledger,
    }
}
