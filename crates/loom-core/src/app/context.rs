//! EngineContext - the shared services every component is built from.

use std::sync::Arc;

use crate::app::failed_queue::FailedJobQueue;
use crate::app::recoverable::RecoverableAction;
use crate::app::router::JobRouter;
use crate::config::EngineConfig;
use crate::ports::{Clock, EventSink, IdGenerator, JobStore};

pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub store: Arc<dyn JobStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: Arc<dyn EventSink>,
    pub router: Arc<JobRouter>,
    pub recoverable: Arc<RecoverableAction>,
    pub failed_queue: Arc<FailedJobQueue>,
}

impl EngineContext {
    /// Wires router, retry backlog and failed job queue around the ports.
    /// Queues start empty; seeding them is the builder's job.
    pub fn assemble(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let router = Arc::new(JobRouter::from_config(
            &config,
            store.clone(),
            events.clone(),
            config.retry_timer_interval,
        ));
        let recoverable = Arc::new(RecoverableAction::new(events.clone()));
        let failed_queue = Arc::new(FailedJobQueue::new(
            store.clone(),
            router.clone(),
            recoverable.clone(),
        ));
        Arc::new(Self {
            config: Arc::new(config),
            store,
            clock,
            ids,
            events,
            router,
            recoverable,
            failed_queue,
        })
    }
}
