//! JobRouter - job type → queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::app::job_queue::JobQueue;
use crate::config::EngineConfig;
use crate::domain::{EngineError, Job, JobType};
use crate::ports::{EventSink, JobStore, SuspendedFilter};

pub const DEFAULT_QUEUE: &str = "default";

pub struct JobRouter {
    queues: HashMap<JobType, Arc<JobQueue>>,
    default_queue: Arc<JobQueue>,
}

impl JobRouter {
    /// One queue per configured activity type plus the default queue, which
    /// takes every other type.
    pub fn from_config(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventSink>,
        retry_delay: Duration,
    ) -> Self {
        let configured = config.activity_types();
        let queues = configured
            .iter()
            .map(|job_type| {
                let queue = JobQueue::new(
                    job_type.as_str(),
                    SuspendedFilter::Type(job_type.clone()),
                    config.queue_for(job_type),
                    store.clone(),
                    events.clone(),
                    retry_delay,
                );
                (job_type.clone(), Arc::new(queue))
            })
            .collect();
        let default_queue = Arc::new(JobQueue::new(
            DEFAULT_QUEUE,
            SuspendedFilter::ExcludeTypes(configured),
            &config.default_queue,
            store,
            events,
            retry_delay,
        ));
        Self {
            queues,
            default_queue,
        }
    }

    pub fn queue_for(&self, job_type: &JobType) -> &Arc<JobQueue> {
        self.queues.get(job_type).unwrap_or(&self.default_queue)
    }

    pub fn default_queue(&self) -> &Arc<JobQueue> {
        &self.default_queue
    }

    /// Every queue, dedicated ones first in type order, default last.
    pub fn queues(&self) -> Vec<(Option<JobType>, Arc<JobQueue>)> {
        let mut types: Vec<&JobType> = self.queues.keys().collect();
        types.sort();
        let mut queues: Vec<(Option<JobType>, Arc<JobQueue>)> = types
            .into_iter()
            .map(|t| (Some(t.clone()), self.queues[t].clone()))
            .collect();
        queues.push((None, self.default_queue.clone()));
        queues
    }

    pub async fn route(&self, job: Job) -> Result<(), EngineError> {
        self.queue_for(&job.job_type).write(job).await
    }
}
