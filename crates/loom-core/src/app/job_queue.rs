//! JobQueue - bounded per-type buffer with store-backed suspension.
//!
//! Single reader (the pump), many writers. Once the buffer is full, or once
//! anything is suspended, new jobs are flagged `suspended`, persisted and
//! dropped from memory. The reader brings them back in batches of
//! `max_queue_length` when the buffer runs dry.
//!
//! The state lock is a `tokio::sync::Mutex` held across the store calls, so a
//! write that suspends and a read that resumes never interleave.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::config::QueueConfiguration;
use crate::domain::{EngineError, EngineEvent, ErrorKind, Job, StoreError};
use crate::ports::{EventSink, JobStore, SuspendedFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub buffered: usize,
    pub suspended: usize,
    pub reader_waiting: bool,
}

#[derive(Default)]
struct QueueState {
    buffer: VecDeque<Job>,
    suspended: usize,
    waiter: Option<oneshot::Sender<Job>>,
}

pub struct JobQueue {
    name: String,
    filter: SuspendedFilter,
    max_queue_length: usize,
    retry_delay: Duration,
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventSink>,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(
        name: impl Into<String>,
        filter: SuspendedFilter,
        config: &QueueConfiguration,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            filter,
            max_queue_length: config.max_queue_length,
            retry_delay,
            store,
            events,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &SuspendedFilter {
        &self.filter
    }

    /// Startup seeding. `jobs` are the recovered runnable ones, oldest first,
    /// buffered up to capacity; `suspended` is what already sits suspended in
    /// the store.
    pub async fn seed(&self, jobs: Vec<Job>, suspended: usize) -> Result<(), EngineError> {
        for job in jobs {
            self.write(job).await?;
        }
        self.state.lock().await.suspended += suspended;
        Ok(())
    }

    pub async fn write(&self, job: Job) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;

        let mut job = job;
        if let Some(waiter) = state.waiter.take() {
            match waiter.send(job) {
                Ok(()) => return Ok(()),
                // reader went away; keep the job
                Err(returned) => job = returned,
            }
        }

        if state.buffer.len() < self.max_queue_length && state.suspended == 0 {
            state.buffer.push_back(job);
            return Ok(());
        }

        let job = job.with_suspended(true);
        self.store.store(&job).await?;
        state.suspended += 1;
        debug!(queue = %self.name, job_id = %job.id, suspended = state.suspended, "job suspended");
        self.events.publish(EngineEvent::job_suspended(&job));
        Ok(())
    }

    /// Next job, waiting for a writer if there is nothing buffered or suspended.
    ///
    /// A newer `read` supersedes a waiting one; the older call then fails with
    /// [`EngineError::QueueWaiterSuperseded`].
    pub async fn read(&self) -> Result<Job, EngineError> {
        let receiver = {
            let mut state = self.state.lock().await;
            loop {
                if let Some(job) = state.buffer.pop_front() {
                    return Ok(job);
                }
                if state.suspended == 0 {
                    break;
                }
                self.resume_suspended(&mut state).await?;
            }

            let (sender, receiver) = oneshot::channel();
            state.waiter = Some(sender);
            receiver
        };

        receiver.await.map_err(|_| EngineError::QueueWaiterSuperseded)
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            buffered: state.buffer.len(),
            suspended: state.suspended,
            reader_waiting: state.waiter.as_ref().is_some_and(|w| !w.is_closed()),
        }
    }

    async fn resume_suspended(&self, state: &mut QueueState) -> Result<(), EngineError> {
        let jobs = loop {
            match self.store.load_suspended(&self.filter, self.max_queue_length).await {
                Ok(jobs) => break jobs,
                Err(error) => self.back_off(error).await?,
            }
        };

        if jobs.is_empty() {
            warn!(queue = %self.name, expected = state.suspended, "no suspended jobs in store, resetting count");
            state.suspended = 0;
            return Ok(());
        }

        debug!(queue = %self.name, count = jobs.len(), "resuming suspended jobs");
        state.suspended = state.suspended.saturating_sub(jobs.len());
        for job in jobs {
            // The batch may be stale; only the flag is cleared on the current snapshot.
            let current = loop {
                match self.store.load(job.id).await {
                    Ok(current) => break current,
                    Err(error) => self.back_off(error).await?,
                }
            };
            let Some(current) = current else {
                warn!(queue = %self.name, job_id = %job.id, "suspended job vanished from store");
                continue;
            };
            if !current.suspended {
                state.buffer.push_back(current);
                continue;
            }

            let resumed = current.with_suspended(false);
            loop {
                match self.store.store(&resumed).await {
                    Ok(()) => break,
                    Err(error) => self.back_off(error).await?,
                }
            }
            state.buffer.push_back(resumed);
        }
        Ok(())
    }

    async fn back_off(&self, error: StoreError) -> Result<(), EngineError> {
        if error.kind() == ErrorKind::Fatal {
            return Err(error.into());
        }
        warn!(queue = %self.name, %error, "store call failed, retrying");
        self.events.publish(EngineEvent::exception(None, &error));
        tokio::time::sleep(self.retry_delay).await;
        Ok(())
    }
}
