//! Startup recovery scan.
//!
//! Loads every job left in a recoverable status and sorts it into the queue it
//! belongs to, oldest first. Suspended jobs stay in the store; the queues
//! only learn how many there are. Failed jobs still inside their retry delay
//! go back to the failed job queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{Job, JobStatus, JobType, StoreError};
use crate::ports::JobStore;

#[derive(Debug, Default)]
pub struct RecoveredJobs {
    pub by_type: HashMap<JobType, Vec<Job>>,
    pub awaiting_retry: Vec<Job>,
}

impl RecoveredJobs {
    /// Recovered jobs of `job_type`, removed from the scan result.
    pub fn take(&mut self, job_type: &JobType) -> Vec<Job> {
        self.by_type.remove(job_type).unwrap_or_default()
    }

    /// Everything not taken yet, oldest first.
    pub fn take_rest(&mut self) -> Vec<Job> {
        let mut rest: Vec<Job> = self.by_type.drain().flat_map(|(_, jobs)| jobs).collect();
        rest.sort_by_key(|job| (job.created_on, job.id));
        rest
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum::<usize>() + self.awaiting_retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub async fn scan(store: &dyn JobStore, now: DateTime<Utc>) -> Result<RecoveredJobs, StoreError> {
    let mut recovered = RecoveredJobs::default();

    for status in JobStatus::RECOVERABLE {
        for job in store.load_by_status(status).await? {
            if job.suspended {
                continue;
            }
            let waiting = job.status == JobStatus::Failed && job.retry_on.is_some_and(|at| at > now);
            if waiting {
                recovered.awaiting_retry.push(job);
            } else {
                recovered.by_type.entry(job.job_type.clone()).or_default().push(job);
            }
        }
    }

    for jobs in recovered.by_type.values_mut() {
        jobs.sort_by_key(|job| (job.created_on, job.id));
    }
    info!(
        jobs = recovered.len(),
        awaiting_retry = recovered.awaiting_retry.len(),
        "recovery scan finished"
    );
    Ok(recovered)
}
