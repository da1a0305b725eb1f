//! EventSink port - イベント記録の抽象化
//!
//! The engine publishes [`EngineEvent`]s and never looks at what the sink
//! does with them.

use crate::domain::EngineEvent;

pub trait EventSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: EngineEvent) {}
}
