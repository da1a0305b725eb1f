//! Dependency resolution port - user work lookup.
//!
//! Every dispatch opens a scope, resolves the handler for the job type from
//! it and drops the scope when the dispatch ends. Scoped resources are
//! released by the scope's `Drop`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{Activity, ActivityError, JobType};

/// User work bound to a job type.
///
/// `invoke` returns `Ok(None)` when the job is done, or `Ok(Some(activity))`
/// to spawn children and wait for them.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        arguments: &[serde_json::Value],
    ) -> Result<Option<Activity>, ActivityError>;
}

pub trait DependencyScope: Send + Sync {
    fn resolve(&self, job_type: &JobType) -> Option<Arc<dyn ActivityHandler>>;
}

pub trait DependencyResolver: Send + Sync {
    fn begin_scope(&self) -> Box<dyn DependencyScope>;

    /// Whether any scope can resolve `job_type`. Used by fail-fast startup checks.
    fn can_resolve(&self, job_type: &JobType) -> bool;
}
