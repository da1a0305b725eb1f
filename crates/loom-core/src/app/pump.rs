//! JobPump - one per queue, feeds the dispatcher.
//!
//! - `max_workers` を Semaphore で制御（None なら無制限）
//! - dispatch は spawn して pump は次の read へ。各 dispatch は見張り task が
//!   join し、エラー / panic を diagnostics に流す
//! - queue の read が唯一の待ち合わせポイント
//! - shutdown は watch で受け取る。実行中の dispatch はキャンセルしない

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info};

use crate::app::dispatcher::{Dispatcher, panic_message};
use crate::app::job_queue::JobQueue;
use crate::domain::{EngineError, EngineEvent, JobId};
use crate::ports::EventSink;

pub struct JobPump {
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn EventSink>,
    throttle: Option<Arc<Semaphore>>,
}

impl JobPump {
    pub fn new(
        queue: Arc<JobQueue>,
        dispatcher: Arc<Dispatcher>,
        events: Arc<dyn EventSink>,
        max_workers: Option<usize>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            events,
            throttle: max_workers.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Pulls and dispatches until shutdown. Fatal dispatch errors are sent
    /// on `fatal`; a fatal queue error ends the pump with that error.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        fatal: mpsc::Sender<EngineError>,
    ) -> Result<(), EngineError> {
        info!(queue = %self.queue.name(), max_workers = ?self.throttle.as_ref().map(|s| s.available_permits()), "pump started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = match &self.throttle {
                Some(throttle) => tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    permit = throttle.clone().acquire_owned() => Some(
                        permit.map_err(|e| EngineError::Internal(format!("pump throttle closed: {e}")))?,
                    ),
                },
                None => None,
            };

            let read = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                read = self.queue.read() => read,
            };

            let job = match read {
                Ok(job) => job,
                Err(EngineError::QueueWaiterSuperseded) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "queue read failed");
                    self.events.publish(EngineEvent::exception(None, &e));
                    continue;
                }
            };

            debug!(queue = %self.queue.name(), job_id = %job.id, status = %job.status, "dispatching");
            let job_id = job.id;
            let dispatcher = self.dispatcher.clone();
            let dispatch = tokio::spawn(async move { dispatcher.dispatch(job).await });
            let report = DispatchReport {
                queue: self.queue.name().to_string(),
                job_id,
                events: self.events.clone(),
                fatal: fatal.clone(),
            };
            tokio::spawn(async move {
                let _permit = permit;
                report.send(dispatch.await).await;
            });
        }

        // In-flight dispatches keep running after shutdown.
        info!(queue = %self.queue.name(), "pump stopped");
        Ok(())
    }
}

/// Where a finished dispatch goes: fatal errors to the scheduler, everything
/// else, panics included, to the diagnostic stream.
struct DispatchReport {
    queue: String,
    job_id: JobId,
    events: Arc<dyn EventSink>,
    fatal: mpsc::Sender<EngineError>,
}

impl DispatchReport {
    async fn send(self, outcome: Result<Result<(), EngineError>, JoinError>) {
        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) if e.is_fatal() => {
                let _ = self.fatal.send(e).await;
                return;
            }
            Ok(Err(e)) => format!("dispatch failed: {e}"),
            Err(join_error) if join_error.is_panic() => {
                format!("dispatch panicked: {}", panic_message(join_error.into_panic()))
            }
            Err(join_error) => format!("dispatch task failed: {join_error}"),
        };
        error!(queue = %self.queue, job_id = %self.job_id, %reason, "dispatch aborted");
        self.events
            .publish(EngineEvent::exception(None, format!("job {}: {reason}", self.job_id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, QueueConfiguration};
    use crate::domain::{Activity, JobStatus, JobType};
    use crate::ports::{DependencyResolver, DependencyScope};
    use crate::testing::{RecordingHandler, TestEngine};
    use std::time::Duration;

    #[tokio::test]
    async fn pump_runs_released_jobs_until_shutdown() {
        let engine = TestEngine::new();
        let handler = RecordingHandler::succeeding();
        let dispatcher = Arc::new(engine.dispatcher(&[("mail", handler.clone())]));
        let (parent, _) = engine
            .start_children(Activity::sequence(vec![
                Activity::run("mail", "send", vec![]),
                Activity::run("mail", "send", vec![]),
            ]))
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let pump = JobPump::new(
            engine.ctx.router.default_queue().clone(),
            dispatcher,
            engine.ctx.events.clone(),
            None,
        );
        let running = tokio::spawn(pump.run(shutdown_rx, fatal_tx));

        engine
            .wait_for_status(parent.id, JobStatus::Completed, Duration::from_secs(2))
            .await;
        assert_eq!(handler.calls().len(), 2);

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn max_workers_bounds_in_flight_dispatches() {
        let config = EngineConfig::default()
            .with_default_queue(QueueConfiguration::default().with_max_workers(2));
        let engine = TestEngine::with_config(config);
        let handler = RecordingHandler::slow(Duration::from_millis(20));
        let dispatcher = Arc::new(engine.dispatcher(&[("mail", handler.clone())]));
        let (parent, _) = engine
            .start_children(Activity::parallel(
                (0..6).map(|_| Activity::run("mail", "send", vec![])).collect(),
            ))
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let pump = JobPump::new(
            engine.ctx.router.default_queue().clone(),
            dispatcher,
            engine.ctx.events.clone(),
            Some(2),
        );
        let running = tokio::spawn(pump.run(shutdown_rx, fatal_tx));

        engine
            .wait_for_status(parent.id, JobStatus::Completed, Duration::from_secs(2))
            .await;
        assert_eq!(handler.calls().len(), 6);
        assert!(handler.max_concurrency() <= 2);

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
    }

    struct ExplodingResolver;

    impl DependencyResolver for ExplodingResolver {
        fn begin_scope(&self) -> Box<dyn DependencyScope> {
            panic!("scope factory exploded")
        }

        fn can_resolve(&self, _: &JobType) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn panicking_dispatch_is_reported() {
        let engine = TestEngine::new();
        let dispatcher = Arc::new(Dispatcher::new(
            engine.ctx.clone(),
            Arc::new(ExplodingResolver),
            engine.commands.clone(),
        ));
        let (_, children) = engine.start_children(Activity::run("mail", "send", vec![])).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let pump = JobPump::new(
            engine.ctx.router.default_queue().clone(),
            dispatcher,
            engine.ctx.events.clone(),
            None,
        );
        let running = tokio::spawn(pump.run(shutdown_rx, fatal_tx));

        let expected = format!("job {}: dispatch panicked: scope factory exploded", children[0].id);
        tokio::time::timeout(Duration::from_secs(2), async {
            while engine
                .events
                .count(|e| matches!(e, EngineEvent::Exception { error, .. } if *error == expected))
                == 0
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_stops_the_pump() {
        let engine = TestEngine::new();
        let dispatcher = Arc::new(engine.dispatcher(&[]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, _fatal_rx) = mpsc::channel(1);
        let pump = JobPump::new(
            engine.ctx.router.default_queue().clone(),
            dispatcher,
            engine.ctx.events.clone(),
            None,
        );
        let running = tokio::spawn(pump.run(shutdown_rx, fatal_tx));

        drop(shutdown_tx);

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
