//! Test fixtures: an engine over the in-memory store, a fixed clock and a
//! recording event sink, plus a scriptable handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::commands::CommandExecutor;
use crate::app::context::EngineContext;
use crate::app::continuation_dispatcher::ContinuationDispatcher;
use crate::app::coordinator::JobCoordinator;
use crate::app::dispatcher::Dispatcher;
use crate::app::status_changer::StatusChanger;
use crate::app::transitions;
use crate::config::EngineConfig;
use crate::domain::{Activity, ActivityError, EngineEvent, Job, JobId, JobStatus};
use crate::impls::{HandlerRegistry, InMemoryJobStore, RecordingEventSink};
use crate::ports::{ActivityHandler, Clock, FixedClock, IdGenerator, JobStore, SystemClock, UlidGenerator};

pub(crate) struct TestEngine {
    pub ctx: Arc<EngineContext>,
    pub store: Arc<InMemoryJobStore>,
    pub events: Arc<RecordingEventSink>,
    pub clock: Arc<FixedClock>,
    pub changer: Arc<StatusChanger>,
    pub commands: Arc<CommandExecutor>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ctx = EngineContext::assemble(
            config,
            store.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            events.clone(),
        );
        let changer = Arc::new(StatusChanger::new(ctx.clone()));
        let coordinator = Arc::new(JobCoordinator::new(ctx.recoverable.clone()));
        let commands = Arc::new(CommandExecutor::new(ctx.clone(), coordinator, changer.clone()));
        Self {
            ctx,
            store,
            events,
            clock,
            changer,
            commands,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stores a top-level job of `job_type` in `status`.
    pub async fn insert_job(&self, job_type: &str, status: JobStatus) -> Job {
        let job = Job::new(
            self.ctx.ids.generate_job_id(),
            job_type.into(),
            "run",
            vec![],
            self.now(),
        )
        .with_status(status);
        self.store.store(&job).await.unwrap();
        job
    }

    pub async fn load(&self, id: JobId) -> Job {
        self.store.get(id).expect("job not stored")
    }

    /// Top-level parent waiting on `activity`, children stored but not released.
    pub async fn spawn_children(&self, activity: Activity) -> (Job, Vec<Job>) {
        let parent = Job::new(
            self.ctx.ids.generate_job_id(),
            "parent".into(),
            "run",
            vec![],
            self.now(),
        )
        .with_status(JobStatus::WaitingForChildren);
        let converted = self.changer.converter().convert(&activity, &parent);
        let parent = parent.with_continuation(Some(converted.continuation));
        let mut batch = converted.jobs.clone();
        batch.push(parent.clone());
        self.store.store_many(&batch).await.unwrap();
        (parent, converted.jobs)
    }

    /// Like [`spawn_children`](Self::spawn_children), with the first runnable
    /// children released.
    pub async fn start_children(&self, activity: Activity) -> (Job, Vec<Job>) {
        let (parent, children) = self.spawn_children(activity).await;
        let (parent, _) = self.continuations().dispatch(&parent).await.unwrap();
        (parent, children)
    }

    /// Moves a stored job to Running the way a dispatch would.
    pub async fn run_job(&self, id: JobId) -> Job {
        let job = self.load(id).await;
        transitions::running(&self.ctx, &job).await.unwrap()
    }

    pub fn continuations(&self) -> ContinuationDispatcher {
        ContinuationDispatcher::new(self.ctx.clone())
    }

    pub fn dispatcher(&self, handlers: &[(&str, RecordingHandler)]) -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        for (job_type, handler) in handlers {
            registry.register(*job_type, Arc::new(handler.clone())).unwrap();
        }
        Dispatcher::new(self.ctx.clone(), Arc::new(registry), self.commands.clone())
    }

    pub async fn wait_for_status(&self, id: JobId, status: JobStatus, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            while self.store.get(id).map(|job| job.status) != Some(status) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status}"));
    }

    /// Jobs in the order they reached a terminal status.
    pub fn final_status_order(&self) -> Vec<(JobId, JobStatus)> {
        self.events
            .events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::StatusChanged { job, to, .. } if to.is_terminal() => Some((job.id, to)),
                _ => None,
            })
            .collect()
    }
}

enum Behavior {
    Succeed,
    Fail(String),
    Spawn(Activity),
    Slow(Duration),
    Panic(String),
}

struct HandlerState {
    behavior: Behavior,
    calls: Mutex<Vec<(String, Vec<serde_json::Value>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Handler that records its calls and does what it was built to do.
#[derive(Clone)]
pub(crate) struct RecordingHandler {
    state: Arc<HandlerState>,
}

impl RecordingHandler {
    fn with(behavior: Behavior) -> Self {
        Self {
            state: Arc::new(HandlerState {
                behavior,
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(Behavior::Succeed)
    }

    pub fn failing(message: &str) -> Self {
        Self::with(Behavior::Fail(message.to_string()))
    }

    pub fn spawning(activity: Activity) -> Self {
        Self::with(Behavior::Spawn(activity))
    }

    pub fn slow(delay: Duration) -> Self {
        Self::with(Behavior::Slow(delay))
    }

    pub fn panicking(message: &str) -> Self {
        Self::with(Behavior::Panic(message.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    pub fn arguments(&self) -> Vec<Vec<serde_json::Value>> {
        self.lock().iter().map(|(_, arguments)| arguments.clone()).collect()
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Vec<serde_json::Value>)>> {
        self.state.calls.lock().unwrap()
    }
}

#[async_trait]
impl ActivityHandler for RecordingHandler {
    async fn invoke(
        &self,
        method: &str,
        arguments: &[serde_json::Value],
    ) -> Result<Option<Activity>, ActivityError> {
        self.lock().push((method.to_string(), arguments.to_vec()));
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let result = match &self.state.behavior {
            Behavior::Succeed => Ok(None),
            Behavior::Fail(message) => Err(ActivityError::new(message.clone())),
            Behavior::Spawn(activity) => Ok(Some(activity.clone())),
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(None)
            }
            Behavior::Panic(message) => panic!("{message}"),
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
