//! StatusChanger - the only place job statuses change.
//!
//! Requested transitions are checked against the transition table first. A
//! rejected request is reported as an event and answered with `Ok(None)`; it
//! is never an error. Every method expects to run inside a coordinated action
//! for the job's tree.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::context::EngineContext;
use crate::app::continuation_dispatcher::ContinuationDispatcher;
use crate::app::converter::ActivityConverter;
use crate::app::transitions;
use crate::domain::{Activity, EngineError, EngineEvent, Job, JobId, JobStatus, StoreError};

pub struct StatusChanger {
    ctx: Arc<EngineContext>,
    converter: ActivityConverter,
    continuations: ContinuationDispatcher,
}

impl StatusChanger {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            converter: ActivityConverter::new(ctx.ids.clone(), ctx.clock.clone()),
            continuations: ContinuationDispatcher::new(ctx.clone()),
            ctx,
        }
    }

    pub fn converter(&self) -> &ActivityConverter {
        &self.converter
    }

    pub fn continuations(&self) -> &ContinuationDispatcher {
        &self.continuations
    }

    /// Moves `job` to `target`. Returns the new snapshot, or `None` when the
    /// transition was rejected.
    pub async fn change_status(&self, job: &Job, target: JobStatus) -> Result<Option<Job>, EngineError> {
        if !job.status.can_transition_to(target) {
            self.reject(job, target);
            return Ok(None);
        }

        let changed = match target {
            JobStatus::Running => transitions::running(&self.ctx, job).await?,
            JobStatus::Failed => transitions::failed(&self.ctx, job).await?,
            JobStatus::Completed | JobStatus::Poisoned => self.end(job, target).await?,
            _ => transitions::apply(&self.ctx, job, target).await?,
        };
        Ok(Some(changed))
    }

    /// Running → WaitingForChildren with `activity` as the job's children.
    ///
    /// A job that already owns a continuation is not converted again; its
    /// continuation is re-dispatched instead. When nothing is left to run the
    /// job ends right away.
    pub async fn wait_for_children(
        &self,
        job: &Job,
        activity: &Activity,
    ) -> Result<Option<Job>, EngineError> {
        if !job.status.can_transition_to(JobStatus::WaitingForChildren) {
            self.reject(job, JobStatus::WaitingForChildren);
            return Ok(None);
        }

        let waiting = if job.continuation.is_some() {
            debug!(job_id = %job.id, "children already spawned, re-dispatching");
            if job.status == JobStatus::WaitingForChildren {
                job.clone()
            } else {
                transitions::apply(&self.ctx, job, JobStatus::WaitingForChildren).await?
            }
        } else {
            let converted = self.converter.convert(activity, job);
            let waiting = job
                .clone()
                .with_status(JobStatus::WaitingForChildren)
                .with_continuation(Some(converted.continuation));
            let mut batch = converted.jobs;
            batch.push(waiting.clone());
            self.ctx.store.store_many(&batch).await?;
            self.ctx
                .events
                .publish(EngineEvent::status_changed(&waiting, job.status));
            waiting
        };

        self.dispatch_continuation(&waiting).await.map(Some)
    }

    /// Releases whatever is runnable under `job`; ends it if nothing is.
    pub async fn dispatch_continuation(&self, job: &Job) -> Result<Job, EngineError> {
        let (job, pending) = self.continuations.dispatch(job).await?;
        if !pending.is_empty() || job.status != JobStatus::WaitingForChildren {
            return Ok(job);
        }
        debug!(job_id = %job.id, "nothing left to run under job, ending it");
        self.end(&job, JobStatus::Completed).await
    }

    /// Ends `job` as `status` (Completed or Poisoned) and walks up the tree.
    ///
    /// A root job is set straight to `status`. Any other job first moves to
    /// the matching intermediary status, then its entry in the parent's
    /// continuation is updated and the parent is re-dispatched. A parent left
    /// with nothing to run ends as `Completed` and the walk repeats for it.
    /// The intermediary jobs are flipped to their final status last, topmost
    /// first, so a crash part way leaves every job recoverable.
    async fn end(&self, job: &Job, status: JobStatus) -> Result<Job, EngineError> {
        let mut staged: Vec<(Job, JobStatus)> = Vec::new();
        let mut current = job.clone();
        let mut end_status = status;

        loop {
            let Some(parent_id) = current.parent_id else {
                let ended = transitions::apply(&self.ctx, &current, end_status).await?;
                if ended.id == job.id {
                    return Ok(ended);
                }
                break;
            };

            let intermediary = end_status.intermediary().ok_or_else(|| {
                EngineError::Internal(format!("{end_status} is not an end status"))
            })?;
            let current_staged = if current.status == intermediary {
                current.clone()
            } else {
                transitions::apply(&self.ctx, &current, intermediary).await?
            };

            let parent = self.load(parent_id).await?;
            let mut tree = parent.continuation.clone().ok_or_else(|| {
                EngineError::Internal(format!("parent {parent_id} of {} has no continuation", current.id))
            })?;
            if !tree.set_status(current.id, end_status) {
                warn!(job_id = %current.id, parent_id = %parent_id, "job missing from parent continuation");
            }
            let parent = parent.with_continuation(Some(tree));
            let (parent, pending) = self.continuations.dispatch(&parent).await?;
            staged.push((current_staged, end_status));

            if !pending.is_empty() {
                break;
            }
            if !parent.status.can_transition_to(JobStatus::Completed) {
                self.reject(&parent, JobStatus::Completed);
                break;
            }
            if let Some(tree) = &parent.continuation {
                if !tree.can_continue() {
                    self.ctx.events.publish(EngineEvent::activity(
                        Some(&parent),
                        "children stopped on an unhandled failure, completing parent",
                    ));
                }
            }
            current = parent;
            end_status = JobStatus::Completed;
        }

        let mut ended = None;
        for (intermediate, status) in staged.iter().rev() {
            let flipped = transitions::apply(&self.ctx, intermediate, *status).await?;
            if flipped.id == job.id {
                ended = Some(flipped);
            }
        }
        ended.ok_or_else(|| EngineError::Internal(format!("end transition lost job {}", job.id)))
    }

    async fn load(&self, id: JobId) -> Result<Job, EngineError> {
        Ok(self.ctx.store.load(id).await?.ok_or(StoreError::NotFound(id))?)
    }

    fn reject(&self, job: &Job, target: JobStatus) {
        debug!(job_id = %job.id, from = %job.status, to = %target, "status change rejected");
        self.ctx
            .events
            .publish(EngineEvent::status_change_rejected(job, target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEngine;
    use JobStatus::*;

    #[tokio::test]
    async fn invalid_transition_is_rejected_with_an_event() {
        let engine = TestEngine::new();
        let job = engine.insert_job("mail", Created).await;

        let result = engine.changer.change_status(&job, Running).await.unwrap();

        assert!(result.is_none());
        assert_eq!(engine.store.get(job.id).unwrap().status, Created);
        assert_eq!(
            engine
                .events
                .count(|e| matches!(e, EngineEvent::StatusChangeRejected { from: Created, to: Running, .. })),
            1
        );
    }

    #[tokio::test]
    async fn root_job_ends_directly() {
        let engine = TestEngine::new();
        let job = engine.insert_job("mail", Running).await;

        let ended = engine.changer.change_status(&job, Completed).await.unwrap().unwrap();

        assert_eq!(ended.status, Completed);
        assert_eq!(engine.store.status_history(job.id), vec![Running, Completed]);
    }

    #[tokio::test]
    async fn child_end_passes_through_intermediary_status() {
        let engine = TestEngine::new();
        let (_, children) = engine
            .start_children(Activity::sequence(vec![
                Activity::run("mail", "send", vec![]),
                Activity::run("mail", "send", vec![]),
            ]))
            .await;
        let child = engine.run_job(children[0].id).await;

        engine.changer.change_status(&child, Completed).await.unwrap();

        assert_eq!(
            engine.store.status_history(child.id),
            vec![Created, Ready, Running, ReadyToComplete, Completed]
        );
        assert_eq!(engine.store.get(children[1].id).unwrap().status, Ready);
    }

    #[tokio::test]
    async fn parent_completes_only_after_both_children() {
        let engine = TestEngine::new();
        let (parent, children) = engine
            .start_children(Activity::parallel(vec![
                Activity::run("mail", "send", vec![]),
                Activity::run("mail", "send", vec![]),
            ]))
            .await;

        let first = engine.run_job(children[0].id).await;
        engine.changer.change_status(&first, Completed).await.unwrap();
        assert_eq!(engine.store.get(parent.id).unwrap().status, WaitingForChildren);

        let second = engine.run_job(children[1].id).await;
        engine.changer.change_status(&second, Completed).await.unwrap();
        assert_eq!(engine.store.get(parent.id).unwrap().status, Completed);
    }

    #[tokio::test]
    async fn completion_walks_up_nested_trees_topmost_first() {
        let engine = TestEngine::new();
        let root = engine.insert_job("root", Running).await;
        let root = engine
            .changer
            .wait_for_children(&root, &Activity::run("parent", "run", vec![]))
            .await
            .unwrap()
            .unwrap();
        let parent_id = root.continuation.as_ref().unwrap().id.unwrap();

        let parent = engine.run_job(parent_id).await;
        let parent = engine
            .changer
            .wait_for_children(&parent, &Activity::run("leaf", "run", vec![]))
            .await
            .unwrap()
            .unwrap();
        let leaf_id = parent.continuation.as_ref().unwrap().id.unwrap();
        let leaf = engine.run_job(leaf_id).await;

        engine.changer.change_status(&leaf, Completed).await.unwrap();

        assert_eq!(engine.store.get(root.id).unwrap().status, Completed);
        assert_eq!(
            engine.store.status_history(parent_id),
            vec![Created, Ready, Running, WaitingForChildren, ReadyToComplete, Completed]
        );
        let order = engine.final_status_order();
        let position = |id| order.iter().position(|(j, _)| *j == id).unwrap();
        assert!(position(root.id) < position(parent_id));
        assert!(position(parent_id) < position(leaf_id));
    }

    #[tokio::test]
    async fn poisoned_child_runs_the_failure_handler() {
        let engine = TestEngine::new();
        let (parent, children) = engine
            .start_children(
                Activity::run("mail", "send", vec![]).on_failed(Activity::run("alert", "page", vec![])),
            )
            .await;
        let child = engine.run_job(children[0].id).await;

        engine.changer.change_status(&child, Poisoned).await.unwrap();

        assert_eq!(engine.store.get(child.id).unwrap().status, Poisoned);
        assert_eq!(engine.store.get(children[1].id).unwrap().status, Ready);
        assert_eq!(engine.store.get(parent.id).unwrap().status, WaitingForChildren);
    }

    #[tokio::test]
    async fn unhandled_failure_still_completes_the_parent() {
        let engine = TestEngine::new();
        let (parent, children) = engine
            .start_children(Activity::run("mail", "send", vec![]))
            .await;
        let child = engine.run_job(children[0].id).await;

        engine.changer.change_status(&child, Poisoned).await.unwrap();

        assert_eq!(engine.store.get(parent.id).unwrap().status, Completed);
        assert_eq!(
            engine.events.count(|e| matches!(e, EngineEvent::Activity { .. })),
            1
        );
    }

    #[tokio::test]
    async fn waiting_again_does_not_convert_twice() {
        let engine = TestEngine::new();
        let job = engine.insert_job("mail", Running).await;
        let activity = Activity::run("mail", "send", vec![]);

        let waiting = engine.changer.wait_for_children(&job, &activity).await.unwrap().unwrap();
        let jobs_before = engine.store.len();
        engine.changer.wait_for_children(&waiting, &activity).await.unwrap();

        assert_eq!(engine.store.len(), jobs_before);
    }

    #[tokio::test]
    async fn empty_group_completes_immediately() {
        let engine = TestEngine::new();
        let job = engine.insert_job("mail", Running).await;

        let done = engine
            .changer
            .wait_for_children(&job, &Activity::parallel(vec![]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(done.status, Completed);
    }

    #[tokio::test]
    async fn resumed_intermediary_finishes_the_walk() {
        let engine = TestEngine::new();
        let (parent, children) = engine
            .start_children(Activity::run("mail", "send", vec![]))
            .await;
        let child = engine.run_job(children[0].id).await;
        // crashed right after the intermediary status was stored
        let staged = transitions::apply(&engine.ctx, &child, ReadyToComplete).await.unwrap();

        engine.changer.change_status(&staged, Completed).await.unwrap();

        assert_eq!(engine.store.get(child.id).unwrap().status, Completed);
        assert_eq!(engine.store.get(parent.id).unwrap().status, Completed);
    }
}
