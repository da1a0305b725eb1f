//! EventSink implementations: tracing output and in-memory recording.

use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::domain::EngineEvent;
use crate::ports::EventSink;

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: EngineEvent) {
        match event {
            EngineEvent::StatusChanged { job, from, to } => info!(
                job_id = %job.id,
                job_type = %job.job_type,
                method = %job.method,
                dispatch_count = job.dispatch_count,
                %from,
                %to,
                "status changed"
            ),
            EngineEvent::StatusChangeRejected { job, from, to } => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                %from,
                %to,
                "status change rejected"
            ),
            EngineEvent::JobSuspended { job } => debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                "job suspended"
            ),
            EngineEvent::JobAbandoned { job } => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                status = %job.status,
                "job abandoned"
            ),
            EngineEvent::Activity { job: Some(job), message } => {
                debug!(job_id = %job.id, job_type = %job.job_type, "{message}")
            }
            EngineEvent::Activity { job: None, message } => debug!("{message}"),
            EngineEvent::TimerActivity { timer, message } => debug!(%timer, "{message}"),
            EngineEvent::Exception { job: Some(job), error } => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                status = %job.status,
                %error,
                "engine exception"
            ),
            EngineEvent::Exception { job: None, error } => error!(%error, "engine exception"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: EngineEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_events_in_order() {
        let sink = RecordingEventSink::new();
        sink.publish(EngineEvent::timer("failed-jobs", "tick"));
        sink.publish(EngineEvent::exception(None, "boom"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], EngineEvent::TimerActivity { .. }));
        assert_eq!(sink.count(|e| matches!(e, EngineEvent::Exception { .. })), 1);
    }
}
