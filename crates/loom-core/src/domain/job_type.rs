use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a user-supplied work implementation.
///
/// Handlers are registered under a `JobType`; queues are configured per `JobType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    /// Type of the synthetic root job created by `Scheduler::schedule`.
    pub const ROOT: &'static str = "loom.root";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn root() -> Self {
        Self::new(Self::ROOT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
