//! Impls - in-process implementations of the ports.
//!
//! - **InMemoryJobStore**: 開発用・テスト用の JobStore
//! - **HandlerRegistry**: DependencyResolver over registered handlers
//! - **TracingEventSink** / **RecordingEventSink**: diagnostics sinks
//!
//! Production stores live outside this crate and implement `ports::JobStore`.

pub mod event_sinks;
pub mod in_memory_store;
pub mod registry;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::in_memory_store::InMemoryJobStore;
pub use self::registry::{HandlerRegistry, RegistryError};
