//! Job record.
//!
//! A `Job` is a value snapshot. Components never share a mutable job: each
//! change produces a new snapshot via the `with_*` methods, which is persisted
//! and replaces the previous one in the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::continuation::Continuation;
use super::exception_filter::ExceptionFilter;
use super::ids::JobId;
use super::job_type::JobType;
use super::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub method: String,
    pub arguments: Vec<serde_json::Value>,
    pub created_on: DateTime<Utc>,

    /// Own id for top-level jobs.
    pub root_id: JobId,
    pub parent_id: Option<JobId>,

    /// Idempotency key for submission. Defaults to the id.
    pub correlation_id: String,

    pub status: JobStatus,

    /// Attempts so far (incremented by the Running transition).
    pub dispatch_count: u32,

    /// When a `Failed` job becomes eligible for another attempt.
    pub retry_on: Option<DateTime<Utc>>,

    pub exception_filters: Vec<ExceptionFilter>,

    /// Present once the job has spawned children.
    pub continuation: Option<Continuation>,

    /// Evicted from its in-memory queue by backpressure.
    pub suspended: bool,
}

impl Job {
    /// New top-level job in `Created`.
    pub fn new(
        id: JobId,
        job_type: JobType,
        method: impl Into<String>,
        arguments: Vec<serde_json::Value>,
        created_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            method: method.into(),
            arguments,
            created_on,
            root_id: id,
            parent_id: None,
            correlation_id: id.to_string(),
            status: JobStatus::Created,
            dispatch_count: 0,
            retry_on: None,
            exception_filters: Vec::new(),
            continuation: None,
            suspended: false,
        }
    }

    /// Re-parent under `parent`, joining its job tree.
    pub fn with_parent(mut self, parent: &Job) -> Self {
        self.root_id = parent.root_id;
        self.parent_id = Some(parent.id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_dispatch_count(mut self, dispatch_count: u32) -> Self {
        self.dispatch_count = dispatch_count;
        self
    }

    pub fn with_retry_on(mut self, retry_on: Option<DateTime<Utc>>) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_exception_filters(mut self, filters: Vec<ExceptionFilter>) -> Self {
        self.exception_filters = filters;
        self
    }

    pub fn with_continuation(mut self, continuation: Option<Continuation>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Subset of a job carried by diagnostic events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub job_type: JobType,
    pub method: String,
    pub status: JobStatus,
    pub dispatch_count: u32,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            method: job.method.clone(),
            status: job.status,
            dispatch_count: job.dispatch_count,
        }
    }
}
