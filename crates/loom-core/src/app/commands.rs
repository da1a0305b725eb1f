//! Commands - typed, replayable status-changing requests.
//!
//! Everything that changes a job goes through a [`Command`], so a request that
//! failed on infrastructure can be parked and replayed later by value.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::app::context::EngineContext;
use crate::app::coordinator::{CoordinatedAction, JobCoordinator};
use crate::app::status_changer::StatusChanger;
use crate::domain::{Activity, EngineError, Job, JobId, JobStatus, StoreError};
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    ChangeStatus(JobStatus),
    WaitForChildren(Activity),
    /// Failed transition, then onto the failed job queue.
    Fail,
    DispatchContinuation,
    /// Created → Ready and onto the job's queue.
    Release,
    Route,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub job_id: JobId,
    pub root_id: JobId,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(job: &Job, kind: CommandKind) -> Self {
        Self {
            job_id: job.id,
            root_id: job.root_id,
            kind,
        }
    }

    pub fn change_status(job: &Job, status: JobStatus) -> Self {
        Self::new(job, CommandKind::ChangeStatus(status))
    }
}

pub struct CommandExecutor {
    ctx: Arc<EngineContext>,
    coordinator: Arc<JobCoordinator>,
    changer: Arc<StatusChanger>,
}

impl CommandExecutor {
    pub fn new(
        ctx: Arc<EngineContext>,
        coordinator: Arc<JobCoordinator>,
        changer: Arc<StatusChanger>,
    ) -> Self {
        Self {
            ctx,
            coordinator,
            changer,
        }
    }

    /// Runs `command` as a coordinated action of its tree and waits for it.
    ///
    /// Returns the job snapshot the command produced; `None` when the change
    /// was rejected or the command was parked for retry.
    pub async fn submit(&self, command: Command) -> Result<Option<Job>, EngineError> {
        let recovery = command.clone();
        self.submit_with_recovery(command, recovery).await
    }

    /// Like [`submit`](Self::submit), replaying `recovery` instead of the
    /// command itself if it fails.
    pub async fn submit_with_recovery(
        &self,
        command: Command,
        recovery: Command,
    ) -> Result<Option<Job>, EngineError> {
        if command.kind == CommandKind::Route {
            let job_id = command.job_id;
            return Ok(self
                .ctx
                .recoverable
                .run(route(self.ctx.clone(), job_id), recovery)
                .await?
                .flatten());
        }

        let (sender, receiver) = oneshot::channel();
        let root_id = command.root_id;
        let ctx = self.ctx.clone();
        let changer = self.changer.clone();
        let action: CoordinatedAction = Box::pin(async move {
            let outcome = execute(&ctx, &changer, command).await?;
            let _ = sender.send(outcome);
            Ok(())
        });

        self.coordinator.run(root_id, action, recovery).await?;
        // sender dropped: the action failed and was parked
        Ok(receiver.await.ok().flatten())
    }

    /// Re-submits everything the recoverable action parked. Only fatal errors
    /// come back; anything else is parked again.
    pub async fn replay_parked(&self) -> Result<usize, EngineError> {
        let parked = self.ctx.recoverable.drain();
        let count = parked.len();
        for command in parked {
            debug!(job_id = %command.job_id, kind = ?command.kind, "replaying parked command");
            self.submit(command).await?;
        }
        Ok(count)
    }
}

async fn execute(
    ctx: &EngineContext,
    changer: &StatusChanger,
    command: Command,
) -> Result<Option<Job>, EngineError> {
    let job = ctx
        .store
        .load(command.job_id)
        .await?
        .ok_or(StoreError::NotFound(command.job_id))?;

    match command.kind {
        CommandKind::ChangeStatus(status) => changer.change_status(&job, status).await,
        CommandKind::WaitForChildren(activity) => changer.wait_for_children(&job, &activity).await,
        CommandKind::Fail => {
            let failed = changer.change_status(&job, JobStatus::Failed).await?;
            if let Some(failed) = &failed {
                ctx.failed_queue.add(failed, ctx.clock.now());
            }
            Ok(failed)
        }
        CommandKind::DispatchContinuation => changer.dispatch_continuation(&job).await.map(Some),
        CommandKind::Release => {
            changer.continuations().release(job.id, job.root_id).await?;
            Ok(ctx.store.load(job.id).await?)
        }
        CommandKind::Route => {
            ctx.router.route(job.clone()).await?;
            Ok(Some(job))
        }
    }
}

async fn route(ctx: Arc<EngineContext>, job_id: JobId) -> Result<Option<Job>, EngineError> {
    let job = ctx.store.load(job_id).await?.ok_or(StoreError::NotFound(job_id))?;
    ctx.router.route(job.clone()).await?;
    Ok(Some(job))
}
