//! JobStore port - durable job storage (source of truth).
//!
//! Contract:
//! - last writer wins per job id; no optimistic concurrency tokens
//! - no transactions across calls; multi-job writes go through `store_many`
//! - `load_suspended` / `count_suspended` see only jobs with `suspended == true`

use async_trait::async_trait;

use crate::domain::{Job, JobId, JobStatus, JobType, StoreError};

/// Which suspended jobs a queue owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendedFilter {
    /// Jobs of one configured activity type.
    Type(JobType),
    /// Jobs of every type except the configured ones (the default queue).
    ExcludeTypes(Vec<JobType>),
}

impl SuspendedFilter {
    pub fn matches(&self, job_type: &JobType) -> bool {
        match self {
            SuspendedFilter::Type(t) => t == job_type,
            SuspendedFilter::ExcludeTypes(excluded) => !excluded.contains(job_type),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn load_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, StoreError>;

    async fn load_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    async fn store(&self, job: &Job) -> Result<(), StoreError>;

    async fn store_many(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Up to `max` suspended jobs, oldest first.
    async fn load_suspended(&self, filter: &SuspendedFilter, max: usize) -> Result<Vec<Job>, StoreError>;

    async fn count_suspended(&self, filter: &SuspendedFilter) -> Result<usize, StoreError>;
}
