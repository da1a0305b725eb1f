//! ContinuationDispatcher - releases the children that became runnable.
//!
//! Always runs inside a coordinated action for the job's tree: it rewrites the
//! continuation cached on the job and persists the result.

use std::sync::Arc;

use tracing::debug;

use crate::app::commands::{Command, CommandKind};
use crate::app::context::EngineContext;
use crate::app::transitions;
use crate::domain::{EngineError, Job, JobId, JobStatus, StoreError};

pub struct ContinuationDispatcher {
    ctx: Arc<EngineContext>,
}

impl ContinuationDispatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Marks every pending entry `Ready`, persists `job`, then releases the
    /// pending children that are still `Created`.
    ///
    /// Returns the persisted job and the pending ids. An empty set means the
    /// tree has nothing left to run.
    pub async fn dispatch(&self, job: &Job) -> Result<(Job, Vec<JobId>), EngineError> {
        let Some(mut continuation) = job.continuation.clone() else {
            return Ok((job.clone(), Vec::new()));
        };

        let pending = continuation.pending_ids();
        for id in &pending {
            continuation.set_status(*id, JobStatus::Ready);
        }
        let job = job.clone().with_continuation(Some(continuation));
        self.ctx.store.store(&job).await?;
        debug!(job_id = %job.id, pending = pending.len(), "continuation dispatched");

        for child_id in &pending {
            let recovery = Command {
                job_id: *child_id,
                root_id: job.root_id,
                kind: CommandKind::Release,
            };
            self.ctx
                .recoverable
                .run(self.release(*child_id, job.root_id), recovery)
                .await?;
        }

        Ok((job, pending))
    }

    /// `Created` → `Ready`, then onto its queue. Anything past `Created` was
    /// released before and is left alone.
    pub async fn release(&self, child_id: JobId, root_id: JobId) -> Result<(), EngineError> {
        let child = self
            .ctx
            .store
            .load(child_id)
            .await?
            .ok_or(StoreError::NotFound(child_id))?;
        if child.status != JobStatus::Created {
            return Ok(());
        }

        let ready = transitions::apply(&self.ctx, &child, JobStatus::Ready).await?;
        let recovery = Command {
            job_id: child_id,
            root_id,
            kind: CommandKind::Route,
        };
        self.ctx.recoverable.run(self.ctx.router.route(ready), recovery).await?;
        Ok(())
    }
}
