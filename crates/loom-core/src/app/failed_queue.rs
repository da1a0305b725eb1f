//! FailedJobQueue - business-failed jobs waiting out their retry delay.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::commands::{Command, CommandKind};
use crate::app::recoverable::RecoverableAction;
use crate::app::router::JobRouter;
use crate::domain::{EngineError, Job, JobId, JobStatus};
use crate::ports::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailedEntry {
    job_id: JobId,
    root_id: JobId,
    retry_on: DateTime<Utc>,
}

pub struct FailedJobQueue {
    entries: Mutex<Vec<FailedEntry>>,
    store: Arc<dyn JobStore>,
    router: Arc<JobRouter>,
    recoverable: Arc<RecoverableAction>,
}

impl FailedJobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        router: Arc<JobRouter>,
        recoverable: Arc<RecoverableAction>,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store,
            router,
            recoverable,
        }
    }

    /// Parks `job` until its `retry_on` (immediately due when unset).
    pub fn add(&self, job: &Job, now: DateTime<Utc>) {
        self.lock().push(FailedEntry {
            job_id: job.id,
            root_id: job.root_id,
            retry_on: job.retry_on.unwrap_or(now),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-routes every entry due at `now`, keeps the rest. Returns the number
    /// of entries taken off the queue.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due: Vec<FailedEntry> = {
            let mut entries = self.lock();
            let (due, waiting): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|e| e.retry_on <= now);
            *entries = waiting;
            due
        };

        for entry in &due {
            let recovery = Command {
                job_id: entry.job_id,
                root_id: entry.root_id,
                kind: CommandKind::Route,
            };
            self.recoverable.run(self.reroute(entry.job_id), recovery).await?;
        }
        Ok(due.len())
    }

    async fn reroute(&self, job_id: JobId) -> Result<(), EngineError> {
        let Some(job) = self.store.load(job_id).await? else {
            return Ok(());
        };
        // someone else already picked it up
        if job.status != JobStatus::Failed {
            debug!(job_id = %job.id, status = %job.status, "failed job moved on, not re-routing");
            return Ok(());
        }
        self.router.route(job).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FailedEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
