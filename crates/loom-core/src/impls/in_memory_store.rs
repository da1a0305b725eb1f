//! InMemoryJobStore - 開発用の JobStore
//!
//! Keeps every job in a `HashMap` behind a mutex. Besides the store contract
//! it records the status history of every job and can be told to fail the
//! next N calls, which is what the engine's retry paths are tested with.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::{Job, JobId, JobStatus, StoreError};
use crate::ports::{JobStore, SuspendedFilter};

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    history: HashMap<JobId, Vec<JobStatus>>,
}

impl StoreState {
    fn put(&mut self, job: &Job) {
        let history = self.history.entry(job.id).or_default();
        if history.last() != Some(&job.status) {
            history.push(job.status);
        }
        self.jobs.insert(job.id, job.clone());
    }

    fn suspended(&self, filter: &SuspendedFilter) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.suspended && filter.matches(&job.job_type))
            .collect();
        jobs.sort_by_key(|job| (job.created_on, job.id));
        jobs
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    failures_remaining: AtomicUsize,
    fatal: AtomicBool,
    load_suspended_calls: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls fail with `StoreError::Unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Makes every call from now on fail with `StoreError::Fatal`.
    pub fn fail_fatally(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    /// Number of `load_suspended` calls that reached the store (failed ones included).
    pub fn load_suspended_calls(&self) -> usize {
        self.load_suspended_calls.load(Ordering::SeqCst)
    }

    /// Distinct consecutive statuses this job was stored with.
    pub fn status_history(&self, id: JobId) -> Vec<JobStatus> {
        self.lock().history.get(&id).cloned().unwrap_or_default()
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by_key(|job| (job.created_on, job.id));
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fatal.load(Ordering::SeqCst) {
            return Err(StoreError::Fatal("store poisoned".into()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn load_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .jobs
            .values()
            .find(|job| job.is_root() && job.correlation_id == correlation_id)
            .cloned())
    }

    async fn load_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.check_available()?;
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_on, job.id));
        Ok(jobs)
    }

    async fn store(&self, job: &Job) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().put(job);
        Ok(())
    }

    async fn store_many(&self, jobs: &[Job]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.lock();
        for job in jobs {
            state.put(job);
        }
        Ok(())
    }

    async fn load_suspended(&self, filter: &SuspendedFilter, max: usize) -> Result<Vec<Job>, StoreError> {
        self.load_suspended_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .lock()
            .suspended(filter)
            .into_iter()
            .take(max)
            .cloned()
            .collect())
    }

    async fn count_suspended(&self, filter: &SuspendedFilter) -> Result<usize, StoreError> {
        self.check_available()?;
        Ok(self.lock().suspended(filter).len())
    }
}
