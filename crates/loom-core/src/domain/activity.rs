//! Declarative activity trees.
//!
//! An `Activity` describes future work. It is converted into jobs and a
//! continuation tree when a job returns it (or when it is scheduled), and is
//! never mutated after that.
//!
//! The value a caller holds is always the root of its tree: `then` and the
//! failure-branch methods consume `self` and hang the new node below it.

use serde::{Deserialize, Serialize};

use super::exception_filter::ExceptionFilter;
use super::job_type::JobType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activity {
    Single(SingleActivity),
    Group(ActivityGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleActivity {
    pub job_type: JobType,
    pub method: String,
    pub arguments: Vec<serde_json::Value>,
    pub next: Option<Box<Activity>>,
    pub on_failed: Option<Box<Activity>>,
    pub exception_filters: Vec<ExceptionFilter>,
    pub continue_after_handling_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityGroup {
    pub children: Vec<Activity>,
    pub is_parallel: bool,
    pub next: Option<Box<Activity>>,
    pub on_any_failed: Option<Box<Activity>>,
    pub on_all_failed: Option<Box<Activity>>,
    pub exception_filters: Vec<ExceptionFilter>,
    pub continue_after_handling_failure: bool,
}

impl Activity {
    pub fn run(
        job_type: impl Into<JobType>,
        method: impl Into<String>,
        arguments: Vec<serde_json::Value>,
    ) -> Self {
        Activity::Single(SingleActivity {
            job_type: job_type.into(),
            method: method.into(),
            arguments,
            next: None,
            on_failed: None,
            exception_filters: Vec::new(),
            continue_after_handling_failure: false,
        })
    }

    pub fn sequence(children: Vec<Activity>) -> Self {
        Self::group(children, false)
    }

    pub fn parallel(children: Vec<Activity>) -> Self {
        Self::group(children, true)
    }

    fn group(children: Vec<Activity>, is_parallel: bool) -> Self {
        Activity::Group(ActivityGroup {
            children,
            is_parallel,
            next: None,
            on_any_failed: None,
            on_all_failed: None,
            exception_filters: Vec::new(),
            continue_after_handling_failure: false,
        })
    }

    /// Appends `next` at the end of this node's `next` chain.
    pub fn then(mut self, next: Activity) -> Self {
        let slot = self.next_slot_mut();
        let chained = match slot.take() {
            Some(existing) => (*existing).then(next),
            None => next,
        };
        *slot = Some(Box::new(chained));
        self
    }

    /// Single: runs when the job is poisoned. Group: runs when every child failed.
    pub fn on_failed(mut self, handler: Activity) -> Self {
        match &mut self {
            Activity::Single(single) => single.on_failed = Some(Box::new(handler)),
            Activity::Group(group) => group.on_all_failed = Some(Box::new(handler)),
        }
        self
    }

    /// Group: runs when at least one child failed. Single: same as `on_failed`.
    pub fn on_any_failed(mut self, handler: Activity) -> Self {
        match &mut self {
            Activity::Single(single) => single.on_failed = Some(Box::new(handler)),
            Activity::Group(group) => group.on_any_failed = Some(Box::new(handler)),
        }
        self
    }

    pub fn with_exception_filter(mut self, filter: ExceptionFilter) -> Self {
        match &mut self {
            Activity::Single(single) => single.exception_filters.push(filter),
            Activity::Group(group) => group.exception_filters.push(filter),
        }
        self
    }

    pub fn continue_after_handling_failure(mut self) -> Self {
        match &mut self {
            Activity::Single(single) => single.continue_after_handling_failure = true,
            Activity::Group(group) => group.continue_after_handling_failure = true,
        }
        self
    }

    pub fn next(&self) -> Option<&Activity> {
        match self {
            Activity::Single(single) => single.next.as_deref(),
            Activity::Group(group) => group.next.as_deref(),
        }
    }

    pub fn exception_filters(&self) -> &[ExceptionFilter] {
        match self {
            Activity::Single(single) => &single.exception_filters,
            Activity::Group(group) => &group.exception_filters,
        }
    }

    fn next_slot_mut(&mut self) -> &mut Option<Box<Activity>> {
        match self {
            Activity::Single(single) => &mut single.next,
            Activity::Group(group) => &mut group.next,
        }
    }
}
