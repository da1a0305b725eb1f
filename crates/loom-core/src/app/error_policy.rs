//! ErrorHandlingPolicy - retry or poison after a business failure.

use std::sync::Arc;

use crate::app::commands::CommandKind;
use crate::config::EngineConfig;
use crate::domain::{Job, JobStatus};

pub struct ErrorHandlingPolicy {
    config: Arc<EngineConfig>,
}

impl ErrorHandlingPolicy {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// `job` is the Running snapshot whose attempt just failed. While
    /// `dispatch_count <= retry_count` it is retried, then it is poisoned.
    pub fn decide(&self, job: &Job) -> CommandKind {
        let retry_count = self.config.queue_for(&job.job_type).retry_count;
        if job.dispatch_count <= retry_count {
            CommandKind::Fail
        } else {
            CommandKind::ChangeStatus(JobStatus::Poisoned)
        }
    }
}
