//! Retry timers.
//!
//! - **FailedJobTimer**: failed job queue の期限到来分を再ルーティング
//! - **RecoverableTimer**: recoverable action の backlog を再投入
//!
//! Both tick every `retry_timer_interval`, independently of each other.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::app::commands::CommandExecutor;
use crate::app::context::EngineContext;
use crate::domain::{EngineError, EngineEvent};
use crate::ports::Clock;

#[async_trait]
pub trait TimerTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// One pass. Only fatal errors should come back.
    async fn tick(&self) -> Result<(), EngineError>;
}

pub struct FailedJobTimer {
    ctx: Arc<EngineContext>,
}

impl FailedJobTimer {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TimerTask for FailedJobTimer {
    fn name(&self) -> &'static str {
        "failed-jobs"
    }

    async fn tick(&self) -> Result<(), EngineError> {
        let rerouted = self.ctx.failed_queue.tick(self.ctx.clock.now()).await?;
        if rerouted > 0 {
            self.ctx.events.publish(EngineEvent::timer(
                self.name(),
                format!("re-routed {rerouted} failed jobs"),
            ));
        }
        Ok(())
    }
}

pub struct RecoverableTimer {
    ctx: Arc<EngineContext>,
    commands: Arc<CommandExecutor>,
}

impl RecoverableTimer {
    pub fn new(ctx: Arc<EngineContext>, commands: Arc<CommandExecutor>) -> Self {
        Self { ctx, commands }
    }
}

#[async_trait]
impl TimerTask for RecoverableTimer {
    fn name(&self) -> &'static str {
        "recoverable"
    }

    async fn tick(&self) -> Result<(), EngineError> {
        let replayed = self.commands.replay_parked().await?;
        if replayed > 0 {
            self.ctx.events.publish(EngineEvent::timer(
                self.name(),
                format!("replayed {replayed} parked commands"),
            ));
        }
        Ok(())
    }
}

/// Ticks `task` every `interval` until shutdown or a fatal error.
pub async fn run_timer(
    task: Arc<dyn TimerTask>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(timer = task.name(), ?interval, "timer started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => task.tick().await?,
        }
    }

    debug!(timer = task.name(), "timer stopped");
    Ok(())
}
