//! Domain model: jobs, statuses, activities, continuations, events, errors.

pub mod activity;
pub mod continuation;
pub mod errors;
pub mod events;
pub mod exception_filter;
pub mod ids;
pub mod job;
pub mod job_type;
pub mod status;

pub use activity::{Activity, ActivityGroup, SingleActivity};
pub use continuation::{Continuation, ContinuationKind};
pub use errors::{ActivityError, EngineError, ErrorKind, StoreError};
pub use events::EngineEvent;
pub use exception_filter::{ExceptionContext, ExceptionFilter, FilterArgument};
pub use ids::JobId;
pub use job::{Job, JobSnapshot};
pub use job_type::JobType;
pub use status::JobStatus;
