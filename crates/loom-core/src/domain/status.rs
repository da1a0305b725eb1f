//! Job lifecycle state machine.
//!
//! ```text
//! Created -> Ready -> Running -> Completed
//!                        |  \-> Failed -> Ready/Running
//!                        \-> WaitingForChildren -> ReadyToComplete -> Completed
//!                                               \-> ReadyToPoison  -> Poisoned
//! ```
//!
//! Requested transitions are validated against [`JobStatus::valid_sources`].
//! `ReadyToComplete` and `ReadyToPoison` are only ever set by the end transition
//! itself, so they have no valid sources as a request target.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Ready,
    Running,
    Completed,
    Failed,
    WaitingForChildren,
    ReadyToComplete,
    ReadyToPoison,
    Poisoned,
}

impl JobStatus {
    /// Statuses loaded by the startup recovery scan.
    pub const RECOVERABLE: [JobStatus; 6] = [
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::WaitingForChildren,
        JobStatus::Failed,
        JobStatus::ReadyToComplete,
        JobStatus::ReadyToPoison,
    ];

    /// Statuses a job may be in when a transition to `self` is requested.
    pub fn valid_sources(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Ready => &[Created],
            Running => &[Ready, Failed, Running],
            Completed => &[Running, WaitingForChildren, ReadyToComplete],
            Failed => &[Running, Failed],
            WaitingForChildren => &[Running, WaitingForChildren],
            Poisoned => &[Running, ReadyToPoison],
            Created | ReadyToComplete | ReadyToPoison => &[],
        }
    }

    pub fn can_transition_to(self, target: JobStatus) -> bool {
        target.valid_sources().contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Poisoned)
    }

    pub fn is_recoverable(self) -> bool {
        Self::RECOVERABLE.contains(&self)
    }

    /// Intermediary status a non-root job passes through on its way to `self`.
    pub fn intermediary(self) -> Option<JobStatus> {
        match self {
            JobStatus::Completed => Some(JobStatus::ReadyToComplete),
            JobStatus::Poisoned => Some(JobStatus::ReadyToPoison),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
