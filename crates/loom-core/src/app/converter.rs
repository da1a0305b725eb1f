//! Activity → continuation conversion.
//!
//! Runs once per spawned activity tree. Produces the continuation tree that
//! gets attached to the parent job and the flat list of new `Created` jobs,
//! which the caller persists in one `store_many` batch before any of them is
//! released.

use std::sync::Arc;

use crate::domain::{Activity, Continuation, ExceptionFilter, Job};
use crate::ports::{Clock, IdGenerator};

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedActivity {
    pub continuation: Continuation,
    pub jobs: Vec<Job>,
}

pub struct ActivityConverter {
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ActivityConverter {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { ids, clock }
    }

    /// Materializes `activity` as children of `parent`. Filters start from the
    /// parent's own filters and accumulate downwards.
    pub fn convert(&self, activity: &Activity, parent: &Job) -> ConvertedActivity {
        let mut jobs = Vec::new();
        let continuation = self.convert_node(activity, parent, &parent.exception_filters, &mut jobs);
        ConvertedActivity { continuation, jobs }
    }

    fn convert_node(
        &self,
        activity: &Activity,
        parent: &Job,
        inherited: &[ExceptionFilter],
        jobs: &mut Vec<Job>,
    ) -> Continuation {
        match activity {
            Activity::Single(single) => {
                let job = Job::new(
                    self.ids.generate_job_id(),
                    single.job_type.clone(),
                    single.method.clone(),
                    single.arguments.clone(),
                    self.clock.now(),
                )
                .with_parent(parent)
                .with_exception_filters(merge_filters(inherited, &single.exception_filters));
                let id = job.id;
                jobs.push(job);

                let next = self.convert_branch(single.next.as_deref(), parent, inherited, jobs);
                let on_failed = self.convert_branch(single.on_failed.as_deref(), parent, inherited, jobs);
                Continuation::single(id)
                    .with_next(next)
                    .with_on_all_failed(on_failed)
                    .with_continue_after_handling_failure(single.continue_after_handling_failure)
            }
            Activity::Group(group) => {
                let filters = merge_filters(inherited, &group.exception_filters);
                let mut children = Vec::with_capacity(group.children.len());
                for child in &group.children {
                    children.push(self.convert_node(child, parent, &filters, jobs));
                }
                let node = if group.is_parallel {
                    Continuation::parallel(children)
                } else {
                    Continuation::sequence(children)
                };

                let next = self.convert_branch(group.next.as_deref(), parent, inherited, jobs);
                let on_any = self.convert_branch(group.on_any_failed.as_deref(), parent, inherited, jobs);
                let on_all = self.convert_branch(group.on_all_failed.as_deref(), parent, inherited, jobs);
                node.with_next(next)
                    .with_on_any_failed(on_any)
                    .with_on_all_failed(on_all)
                    .with_continue_after_handling_failure(group.continue_after_handling_failure)
            }
        }
    }

    fn convert_branch(
        &self,
        branch: Option<&Activity>,
        parent: &Job,
        inherited: &[ExceptionFilter],
        jobs: &mut Vec<Job>,
    ) -> Option<Continuation> {
        branch.map(|activity| self.convert_node(activity, parent, inherited, jobs))
    }
}

fn merge_filters(inherited: &[ExceptionFilter], own: &[ExceptionFilter]) -> Vec<ExceptionFilter> {
    let mut filters = inherited.to_vec();
    for filter in own {
        if !filters.contains(filter) {
            filters.push(filter.clone());
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContinuationKind, JobId, JobStatus, JobType};
    use crate::ports::{SystemClock, UlidGenerator};
    use chrono::Utc;
    use ulid::Ulid;

    fn converter() -> ActivityConverter {
        ActivityConverter::new(Arc::new(UlidGenerator::new(SystemClock)), Arc::new(SystemClock))
    }

    fn parent() -> Job {
        Job::new(
            JobId::from_ulid(Ulid::new()),
            JobType::new("parent"),
            "run",
            vec![],
            Utc::now(),
        )
    }

    fn job_of<'a>(converted: &'a ConvertedActivity, job_type: &str) -> &'a Job {
        converted
            .jobs
            .iter()
            .find(|job| job.job_type.as_str() == job_type)
            .unwrap()
    }

    #[test]
    fn single_activity_becomes_one_created_child() {
        let parent = parent();
        let converted = converter().convert(&Activity::run("mail", "send", vec![]), &parent);

        assert_eq!(converted.jobs.len(), 1);
        let job = &converted.jobs[0];
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.parent_id, Some(parent.id));
        assert_eq!(job.root_id, parent.root_id);
        assert_eq!(converted.continuation.kind, ContinuationKind::Single);
        assert_eq!(converted.continuation.id, Some(job.id));
    }

    #[test]
    fn next_and_on_failed_are_linked() {
        let activity = Activity::run("a", "run", vec![])
            .then(Activity::run("b", "run", vec![]))
            .on_failed(Activity::run("cleanup", "run", vec![]));

        let converted = converter().convert(&activity, &parent());

        assert_eq!(converted.jobs.len(), 3);
        let root = &converted.continuation;
        assert_eq!(root.next.as_ref().unwrap().id, Some(job_of(&converted, "b").id));
        assert_eq!(
            root.on_all_failed.as_ref().unwrap().id,
            Some(job_of(&converted, "cleanup").id)
        );
    }

    #[test]
    fn group_converts_children_and_branches() {
        let activity = Activity::parallel(vec![
            Activity::run("a", "run", vec![]),
            Activity::sequence(vec![Activity::run("b", "run", vec![]), Activity::run("c", "run", vec![])]),
        ])
        .on_any_failed(Activity::run("any", "run", vec![]))
        .on_failed(Activity::run("all", "run", vec![]))
        .then(Activity::run("after", "run", vec![]))
        .continue_after_handling_failure();

        let converted = converter().convert(&activity, &parent());
        let root = &converted.continuation;

        assert_eq!(converted.jobs.len(), 6);
        assert_eq!(root.kind, ContinuationKind::Parallel);
        assert!(root.id.is_none());
        assert!(root.continue_after_handling_failure);
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].kind, ContinuationKind::Sequence);
        assert_eq!(root.on_any_failed.as_ref().unwrap().id, Some(job_of(&converted, "any").id));
        assert_eq!(root.on_all_failed.as_ref().unwrap().id, Some(job_of(&converted, "all").id));
        assert_eq!(root.next.as_ref().unwrap().id, Some(job_of(&converted, "after").id));
        assert_eq!(root.pending_ids(), vec![job_of(&converted, "a").id, job_of(&converted, "b").id]);
    }

    #[test]
    fn filters_accumulate_down_the_tree_but_not_across_siblings() {
        let outer = ExceptionFilter::new("alerts", "outer");
        let inner = ExceptionFilter::new("alerts", "inner");
        let own = ExceptionFilter::new("alerts", "own");
        let inherited = ExceptionFilter::new("alerts", "inherited");

        let activity = Activity::sequence(vec![
            Activity::parallel(vec![
                Activity::run("deep", "run", vec![]).with_exception_filter(own.clone()),
            ])
            .with_exception_filter(inner.clone()),
            Activity::run("sibling", "run", vec![]),
        ])
        .with_exception_filter(outer.clone())
        .then(Activity::run("after", "run", vec![]));

        let parent = parent().with_exception_filters(vec![inherited.clone()]);
        let converted = converter().convert(&activity, &parent);

        assert_eq!(
            job_of(&converted, "deep").exception_filters,
            vec![inherited.clone(), outer.clone(), inner, own]
        );
        assert_eq!(job_of(&converted, "sibling").exception_filters, vec![inherited.clone(), outer]);
        assert_eq!(job_of(&converted, "after").exception_filters, vec![inherited]);
    }
}
