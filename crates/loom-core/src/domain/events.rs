//! Diagnostic events produced by the engine.
//!
//! Consumers may log, ignore or alert on them; the engine never depends on
//! what they do.

use serde::{Deserialize, Serialize};

use super::job::{Job, JobSnapshot};
use super::status::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StatusChanged {
        job: JobSnapshot,
        from: JobStatus,
        to: JobStatus,
    },
    StatusChangeRejected {
        job: JobSnapshot,
        from: JobStatus,
        to: JobStatus,
    },
    JobSuspended {
        job: JobSnapshot,
    },
    /// Job found in a status the dispatcher cannot act on; left for an operator.
    JobAbandoned {
        job: JobSnapshot,
    },
    Activity {
        job: Option<JobSnapshot>,
        message: String,
    },
    TimerActivity {
        timer: String,
        message: String,
    },
    Exception {
        job: Option<JobSnapshot>,
        error: String,
    },
}

impl EngineEvent {
    pub fn status_changed(job: &Job, from: JobStatus) -> Self {
        EngineEvent::StatusChanged {
            job: job.into(),
            from,
            to: job.status,
        }
    }

    pub fn status_change_rejected(job: &Job, to: JobStatus) -> Self {
        EngineEvent::StatusChangeRejected {
            job: job.into(),
            from: job.status,
            to,
        }
    }

    pub fn job_suspended(job: &Job) -> Self {
        EngineEvent::JobSuspended { job: job.into() }
    }

    pub fn job_abandoned(job: &Job) -> Self {
        EngineEvent::JobAbandoned { job: job.into() }
    }

    pub fn activity(job: Option<&Job>, message: impl Into<String>) -> Self {
        EngineEvent::Activity {
            job: job.map(JobSnapshot::from),
            message: message.into(),
        }
    }

    pub fn timer(timer: impl Into<String>, message: impl Into<String>) -> Self {
        EngineEvent::TimerActivity {
            timer: timer.into(),
            message: message.into(),
        }
    }

    pub fn exception(job: Option<&Job>, error: impl std::fmt::Display) -> Self {
        EngineEvent::Exception {
            job: job.map(JobSnapshot::from),
            error: error.to_string(),
        }
    }
}
