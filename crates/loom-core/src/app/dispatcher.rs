//! Dispatcher - runs one job pulled off a queue.
//!
//! # フロー
//! 1. Ready / Running / Failed: scope を開き Running へ遷移、handler 実行
//! 2. 成功 → Completed、子 activity あり → WaitingForChildren
//! 3. 失敗 → exception filter 実行 → ErrorHandlingPolicy (Failed or Poisoned)
//! 4. WaitingForChildren: continuation を再 dispatch
//! 5. ReadyToComplete / ReadyToPoison: 最終 status へ
//! 6. それ以外: abandoned
//!
//! Every status change is a coordinated command; only fatal errors come back.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::app::commands::{Command, CommandExecutor, CommandKind};
use crate::app::context::EngineContext;
use crate::app::error_policy::ErrorHandlingPolicy;
use crate::domain::{Activity, ActivityError, EngineError, EngineEvent, ExceptionContext, Job, JobStatus};
use crate::ports::{ActivityHandler, DependencyResolver, DependencyScope};

pub struct Dispatcher {
    ctx: Arc<EngineContext>,
    resolver: Arc<dyn DependencyResolver>,
    commands: Arc<CommandExecutor>,
    policy: ErrorHandlingPolicy,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<EngineContext>,
        resolver: Arc<dyn DependencyResolver>,
        commands: Arc<CommandExecutor>,
    ) -> Self {
        Self {
            policy: ErrorHandlingPolicy::new(ctx.config.clone()),
            ctx,
            resolver,
            commands,
        }
    }

    pub async fn dispatch(&self, job: Job) -> Result<(), EngineError> {
        match job.status {
            JobStatus::Ready | JobStatus::Running | JobStatus::Failed => self.run(job).await,
            JobStatus::WaitingForChildren => {
                self.commands
                    .submit(Command::new(&job, CommandKind::DispatchContinuation))
                    .await?;
                Ok(())
            }
            JobStatus::ReadyToComplete => self.finish(&job, JobStatus::Completed).await,
            JobStatus::ReadyToPoison => self.finish(&job, JobStatus::Poisoned).await,
            JobStatus::Created | JobStatus::Completed | JobStatus::Poisoned => {
                warn!(job_id = %job.id, status = %job.status, "job abandoned");
                self.ctx.events.publish(EngineEvent::job_abandoned(&job));
                Ok(())
            }
        }
    }

    async fn run(&self, job: Job) -> Result<(), EngineError> {
        let scope = self.resolver.begin_scope();

        // A parked Running change re-routes the job instead of replaying the
        // change, so the handler still runs.
        let start = Command::change_status(&job, JobStatus::Running);
        let Some(running) = self
            .commands
            .submit_with_recovery(start, Command::new(&job, CommandKind::Route))
            .await?
        else {
            debug!(job_id = %job.id, status = %job.status, "job not started");
            return Ok(());
        };

        let result = match scope.resolve(&running.job_type) {
            Some(handler) => invoke_isolated(handler, &running).await,
            None => Err(ActivityError::new(format!(
                "no handler registered for job type {}",
                running.job_type
            ))),
        };

        let next = match result {
            Ok(None) => CommandKind::ChangeStatus(JobStatus::Completed),
            Ok(Some(activity)) => CommandKind::WaitForChildren(activity),
            Err(error) => {
                warn!(
                    job_id = %running.id,
                    job_type = %running.job_type,
                    dispatch_count = running.dispatch_count,
                    %error,
                    "job failed"
                );
                self.run_exception_filters(scope.as_ref(), &running, &error).await;
                self.policy.decide(&running)
            }
        };

        self.commands.submit(Command::new(&running, next)).await?;
        Ok(())
    }

    async fn finish(&self, job: &Job, status: JobStatus) -> Result<(), EngineError> {
        self.commands.submit(Command::change_status(job, status)).await?;
        Ok(())
    }

    /// Each filter runs on its own; a failing filter is reported and skipped.
    async fn run_exception_filters(&self, scope: &dyn DependencyScope, job: &Job, error: &ActivityError) {
        if job.exception_filters.is_empty() {
            return;
        }
        let context = ExceptionContext::new(job, error.message());

        for filter in &job.exception_filters {
            let Some(handler) = scope.resolve(&filter.job_type) else {
                warn!(job_id = %job.id, filter = %filter.job_type, "exception filter handler not registered");
                self.ctx.events.publish(EngineEvent::exception(
                    Some(job),
                    format!("no handler for exception filter {}", filter.job_type),
                ));
                continue;
            };
            let arguments = filter.resolve_arguments(&context);
            let invocation = invoke_isolated_with(handler, filter.method.clone(), arguments, job);
            if let Err(filter_error) = invocation.await {
                warn!(job_id = %job.id, filter = %filter.job_type, error = %filter_error, "exception filter failed");
                self.ctx.events.publish(EngineEvent::exception(Some(job), filter_error));
            }
        }
    }
}

async fn invoke_isolated(
    handler: Arc<dyn ActivityHandler>,
    job: &Job,
) -> Result<Option<Activity>, ActivityError> {
    invoke_isolated_with(handler, job.method.clone(), job.arguments.clone(), job).await
}

/// Runs user code on its own task so a panic comes back as a business failure.
async fn invoke_isolated_with(
    handler: Arc<dyn ActivityHandler>,
    method: String,
    arguments: Vec<serde_json::Value>,
    job: &Job,
) -> Result<Option<Activity>, ActivityError> {
    let task = tokio::spawn(async move { handler.invoke(&method, &arguments).await });
    match task.await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            error!(job_id = %job.id, job_type = %job.job_type, panic = %message, "handler panicked");
            Err(ActivityError::new(format!("handler panicked: {message}")))
        }
        Err(join_error) => Err(ActivityError::new(format!("handler task failed: {join_error}"))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
