//! Ports - 抽象化レイヤー
//!
//! Interfaces to everything outside the engine: storage, time, ids,
//! diagnostics and user work. `impls` holds the in-process implementations.

pub mod clock;
pub mod dependency;
pub mod event_sink;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dependency::{ActivityHandler, DependencyResolver, DependencyScope};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobStore, SuspendedFilter};
