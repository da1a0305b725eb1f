//! Transition handlers for the single-job transitions.
//!
//! Each one persists the new snapshot and reports it. Validation happens in
//! the status changer before any of these run; the end and
//! waiting-for-children transitions live there as well since they touch more
//! than one job.

use crate::app::context::EngineContext;
use crate::domain::{EngineError, EngineEvent, Job, JobStatus};
use crate::ports::Clock;

/// Stores `job` in `status` and publishes the change.
pub async fn apply(ctx: &EngineContext, job: &Job, status: JobStatus) -> Result<Job, EngineError> {
    persist(ctx, job, job.clone().with_status(status)).await
}

/// Running: counts the dispatch.
pub async fn running(ctx: &EngineContext, job: &Job) -> Result<Job, EngineError> {
    let updated = job
        .clone()
        .with_status(JobStatus::Running)
        .with_dispatch_count(job.dispatch_count + 1);
    persist(ctx, job, updated).await
}

/// Failed: schedules the next attempt `retry_delay` from now.
pub async fn failed(ctx: &EngineContext, job: &Job) -> Result<Job, EngineError> {
    let delay = ctx.config.queue_for(&job.job_type).retry_delay;
    let delay = chrono::Duration::from_std(delay)
        .map_err(|e| EngineError::InvalidConfiguration(format!("retry_delay out of range: {e}")))?;
    let updated = job
        .clone()
        .with_status(JobStatus::Failed)
        .with_retry_on(Some(ctx.clock.now() + delay));
    persist(ctx, job, updated).await
}

async fn persist(ctx: &EngineContext, before: &Job, after: Job) -> Result<Job, EngineError> {
    ctx.store.store(&after).await?;
    ctx.events.publish(EngineEvent::status_changed(&after, before.status));
    Ok(after)
}
