//! Failure hooks attached to activities.
//!
//! A filter names a handler (job type + method) and the arguments to call it
//! with. One argument slot is reserved for the [`ExceptionContext`] of the
//! failing dispatch; everything else is captured when the filter is built.

use serde::{Deserialize, Serialize};

use super::{Job, JobId, JobStatus, JobType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterArgument {
    Value(serde_json::Value),
    /// Replaced by the serialized `ExceptionContext` at invocation time.
    ExceptionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionFilter {
    pub job_type: JobType,
    pub method: String,
    pub arguments: Vec<FilterArgument>,
}

impl ExceptionFilter {
    /// Filter whose only argument is the exception context.
    pub fn new(job_type: impl Into<JobType>, method: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            method: method.into(),
            arguments: vec![FilterArgument::ExceptionContext],
        }
    }

    /// Filter with captured arguments; the context slot goes where the caller puts it.
    pub fn with_arguments(
        job_type: impl Into<JobType>,
        method: impl Into<String>,
        arguments: Vec<FilterArgument>,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            method: method.into(),
            arguments,
        }
    }

    /// Arguments with the context slot filled in.
    pub fn resolve_arguments(&self, context: &ExceptionContext) -> Vec<serde_json::Value> {
        self.arguments
            .iter()
            .map(|argument| match argument {
                FilterArgument::Value(value) => value.clone(),
                FilterArgument::ExceptionContext => {
                    serde_json::to_value(context).unwrap_or(serde_json::Value::Null)
                }
            })
            .collect()
    }
}

/// Passed to exception filters describing the failed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub method: String,
    pub status: JobStatus,
    pub dispatch_count: u32,
    pub error: String,
}

impl ExceptionContext {
    pub fn new(job: &Job, error: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            method: job.method.clone(),
            status: job.status,
            dispatch_count: job.dispatch_count,
            error: error.into(),
        }
    }
}
