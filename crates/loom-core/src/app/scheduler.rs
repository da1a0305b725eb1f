//! Scheduler - submission and run loop.
//!
//! `schedule` turns an activity tree into a root job (`loom.root`) waiting on
//! its children and releases the first runnable ones. `start` runs one pump
//! per queue plus the retry timers until shutdown or a fatal error.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::app::commands::{Command, CommandExecutor, CommandKind};
use crate::app::context::EngineContext;
use crate::app::job_queue::QueueStats;
use crate::app::pump::JobPump;
use crate::app::status_changer::StatusChanger;
use crate::app::timers::{FailedJobTimer, RecoverableTimer, TimerTask, run_timer};
use crate::domain::{Activity, EngineError, EngineEvent, Job, JobId, JobStatus, JobType};
use crate::ports::{Clock, IdGenerator};

const ROOT_METHOD: &str = "run";

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    changer: Arc<StatusChanger>,
    commands: Arc<CommandExecutor>,
    pumps: Mutex<Vec<JobPump>>,
    correlation: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        changer: Arc<StatusChanger>,
        commands: Arc<CommandExecutor>,
        pumps: Vec<JobPump>,
    ) -> Self {
        Self {
            ctx,
            changer,
            commands,
            pumps: Mutex::new(pumps),
            correlation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Submits `activity` and returns the id of its root job.
    ///
    /// Submitting again with a correlation id that already has a root returns
    /// that root instead of creating another tree.
    pub async fn schedule(
        &self,
        activity: Activity,
        correlation_id: Option<String>,
    ) -> Result<JobId, EngineError> {
        let root = {
            // Held through the batch store so a correlation id gets one root.
            let _guard = match &correlation_id {
                Some(correlation_id) => {
                    let guard = self.correlation.lock().await;
                    if let Some(existing) = self.ctx.store.load_by_correlation_id(correlation_id).await? {
                        info!(%correlation_id, root_id = %existing.id, "already scheduled");
                        return Ok(existing.id);
                    }
                    Some(guard)
                }
                None => None,
            };

            let mut root = Job::new(
                self.ctx.ids.generate_job_id(),
                JobType::root(),
                ROOT_METHOD,
                Vec::new(),
                self.ctx.clock.now(),
            )
            .with_status(JobStatus::WaitingForChildren);
            if let Some(correlation_id) = correlation_id {
                root = root.with_correlation_id(correlation_id);
            }

            let converted = self.changer.converter().convert(&activity, &root);
            let root = root.with_continuation(Some(converted.continuation));
            let mut batch = Vec::with_capacity(converted.jobs.len() + 1);
            batch.push(root.clone());
            batch.extend(converted.jobs);
            self.ctx.store.store_many(&batch).await?;
            root
        };

        info!(root_id = %root.id, correlation_id = %root.correlation_id, "scheduled");
        self.ctx
            .events
            .publish(EngineEvent::activity(Some(&root), "scheduled"));
        self.commands
            .submit(Command::new(&root, CommandKind::DispatchContinuation))
            .await?;
        Ok(root.id)
    }

    pub async fn load(&self, id: JobId) -> Result<Option<Job>, EngineError> {
        Ok(self.ctx.store.load(id).await?)
    }

    /// Per-queue stats keyed by queue name.
    pub async fn queue_stats(&self) -> BTreeMap<String, QueueStats> {
        let mut stats = BTreeMap::new();
        for (_, queue) in self.ctx.router.queues() {
            stats.insert(queue.name().to_string(), queue.stats().await);
        }
        stats
    }

    /// Runs pumps and timers until `shutdown` turns true (or its sender is
    /// dropped). A fatal error anywhere stops everything and is returned.
    /// Can only be started once.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let pumps = std::mem::take(&mut *self.pumps.lock().unwrap_or_else(|e| e.into_inner()));
        if pumps.is_empty() {
            return Err(EngineError::Internal("scheduler already started".into()));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let interval = self.ctx.config.retry_timer_interval;
        let timers: [Arc<dyn TimerTask>; 2] = [
            Arc::new(FailedJobTimer::new(self.ctx.clone())),
            Arc::new(RecoverableTimer::new(self.ctx.clone(), self.commands.clone())),
        ];

        let mut tasks = JoinSet::new();
        info!(pumps = pumps.len(), "scheduler starting");
        for pump in pumps {
            tasks.spawn(pump.run(stop_rx.clone(), fatal_tx.clone()));
        }
        for timer in timers {
            tasks.spawn(run_timer(timer, interval, stop_rx.clone()));
        }
        drop(fatal_tx);

        let result = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                Some(fatal) = fatal_rx.recv() => break Err(fatal),
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break Err(e),
                    Err(e) => break Err(EngineError::Internal(format!("engine task panicked: {e}"))),
                },
            }
        };

        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}
        match &result {
            Ok(()) => info!("scheduler stopped"),
            Err(e) => {
                error!(error = %e, "scheduler stopped on fatal error");
                self.ctx.events.publish(EngineEvent::exception(None, e));
            }
        }
        result
    }
}
