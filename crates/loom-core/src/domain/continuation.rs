//! Continuation trees.
//!
//! A continuation mirrors one materialized activity node. The shape is fixed
//! when the activity is converted; afterwards only `status` changes, and only
//! inside coordinated actions (continuation dispatch and the end transition).
//!
//! Two read-only evaluations drive the engine:
//! - [`Continuation::pending`]: which single nodes are runnable right now (or
//!   still outstanding). An empty result means the subtree is resolved.
//! - [`Continuation::can_continue`]: whether the resolved subtree lets the
//!   enclosing line of execution proceed.

use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::status::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContinuationKind {
    Single,
    Sequence,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    /// Job represented by this node. `None` for group headers.
    pub id: Option<JobId>,
    pub kind: ContinuationKind,
    /// Cached status of the job (`Created`, `Ready`, `Completed` or `Poisoned`).
    pub status: JobStatus,
    pub children: Vec<Continuation>,
    pub next: Option<Box<Continuation>>,
    pub on_any_failed: Option<Box<Continuation>>,
    pub on_all_failed: Option<Box<Continuation>>,
    pub continue_after_handling_failure: bool,
}

impl Continuation {
    pub fn single(id: JobId) -> Self {
        Self::node(Some(id), ContinuationKind::Single, Vec::new())
    }

    pub fn sequence(children: Vec<Continuation>) -> Self {
        Self::node(None, ContinuationKind::Sequence, children)
    }

    pub fn parallel(children: Vec<Continuation>) -> Self {
        Self::node(None, ContinuationKind::Parallel, children)
    }

    fn node(id: Option<JobId>, kind: ContinuationKind, children: Vec<Continuation>) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Created,
            children,
            next: None,
            on_any_failed: None,
            on_all_failed: None,
            continue_after_handling_failure: false,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_next(mut self, next: Option<Continuation>) -> Self {
        self.next = next.map(Box::new);
        self
    }

    pub fn with_on_any_failed(mut self, handler: Option<Continuation>) -> Self {
        self.on_any_failed = handler.map(Box::new);
        self
    }

    pub fn with_on_all_failed(mut self, handler: Option<Continuation>) -> Self {
        self.on_all_failed = handler.map(Box::new);
        self
    }

    pub fn with_continue_after_handling_failure(mut self, value: bool) -> Self {
        self.continue_after_handling_failure = value;
        self
    }

    pub fn is_group(&self) -> bool {
        self.kind != ContinuationKind::Single
    }

    /// Single nodes that are runnable or still outstanding, depth-first.
    pub fn pending(&self) -> Vec<&Continuation> {
        match self.kind {
            ContinuationKind::Single => match self.status {
                JobStatus::Created | JobStatus::Ready => vec![self],
                JobStatus::Poisoned => {
                    let handlers = pending_of(&self.on_all_failed);
                    if handlers.is_empty() && self.continue_after_handling_failure {
                        pending_of(&self.next)
                    } else {
                        handlers
                    }
                }
                JobStatus::Completed => pending_of(&self.next),
                _ => Vec::new(),
            },
            ContinuationKind::Parallel => {
                let pending: Vec<&Continuation> =
                    self.children.iter().flat_map(|child| child.pending()).collect();
                if !pending.is_empty() {
                    return pending;
                }
                self.resolved_group_pending()
            }
            ContinuationKind::Sequence => {
                for child in &self.children {
                    let pending = child.pending();
                    if !pending.is_empty() {
                        return pending;
                    }
                    if !child.can_continue() {
                        break;
                    }
                }
                self.resolved_group_pending()
            }
        }
    }

    /// Ids of [`Continuation::pending`].
    pub fn pending_ids(&self) -> Vec<JobId> {
        self.pending().into_iter().filter_map(|node| node.id).collect()
    }

    fn resolved_group_pending(&self) -> Vec<&Continuation> {
        let failed = self.failed_children();
        if failed == 0 {
            return pending_of(&self.next);
        }

        let mut pending = pending_of(&self.on_any_failed);
        if failed == self.children.len() {
            pending.extend(pending_of(&self.on_all_failed));
        }
        if pending.is_empty() && self.continue_after_handling_failure {
            return pending_of(&self.next);
        }
        pending
    }

    fn failed_children(&self) -> usize {
        self.children.iter().filter(|child| !child.can_continue()).count()
    }

    pub fn can_continue(&self) -> bool {
        self.can_continue_as(false)
    }

    fn can_continue_as(&self, is_failure_handler: bool) -> bool {
        match self.kind {
            ContinuationKind::Single => match self.status {
                JobStatus::Completed => {
                    !is_failure_handler
                        || self.next.as_deref().is_none_or(|next| next.can_continue_as(true))
                }
                JobStatus::Poisoned => {
                    self.continue_after_handling_failure
                        && handler_can_continue(&self.on_all_failed)
                }
                _ => false,
            },
            ContinuationKind::Sequence | ContinuationKind::Parallel => {
                let failed = self.failed_children();
                if failed == 0 {
                    return true;
                }
                if !self.continue_after_handling_failure {
                    return false;
                }
                let any_handled = handler_can_continue(&self.on_any_failed);
                if failed == self.children.len() {
                    any_handled && handler_can_continue(&self.on_all_failed)
                } else {
                    any_handled
                }
            }
        }
    }

    /// Node representing `id`: self, then `on_any_failed`, `on_all_failed`,
    /// `next`, then children. First match wins.
    pub fn find(&self, id: JobId) -> Option<&Continuation> {
        if self.id == Some(id) {
            return Some(self);
        }
        [&self.on_any_failed, &self.on_all_failed, &self.next]
            .into_iter()
            .flatten()
            .find_map(|node| node.find(id))
            .or_else(|| self.children.iter().find_map(|child| child.find(id)))
    }

    pub fn find_mut(&mut self, id: JobId) -> Option<&mut Continuation> {
        if self.id == Some(id) {
            return Some(self);
        }
        if let Some(found) = self.on_any_failed.as_deref_mut().and_then(|n| n.find_mut(id)) {
            return Some(found);
        }
        if let Some(found) = self.on_all_failed.as_deref_mut().and_then(|n| n.find_mut(id)) {
            return Some(found);
        }
        if let Some(found) = self.next.as_deref_mut().and_then(|n| n.find_mut(id)) {
            return Some(found);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Updates the cached status of the node for `id`. Returns false if absent.
    pub fn set_status(&mut self, id: JobId, status: JobStatus) -> bool {
        match self.find_mut(id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }
}

fn pending_of(node: &Option<Box<Continuation>>) -> Vec<&Continuation> {
    node.as_deref().map(Continuation::pending).unwrap_or_default()
}

// An absent handler does not block a node flagged to continue after failure.
fn handler_can_continue(handler: &Option<Box<Continuation>>) -> bool {
    handler.as_deref().is_none_or(|h| h.can_continue_as(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn id() -> JobId {
        JobId::from_ulid(Ulid::new())
    }

    fn single(status: JobStatus) -> Continuation {
        Continuation::single(id()).with_status(status)
    }

    #[test]
    fn lone_completed_single_can_continue() {
        assert!(single(Completed).can_continue());
    }

    #[test]
    fn lone_poisoned_single_cannot_continue() {
        assert!(!single(Poisoned).can_continue());
    }

    #[rstest]
    #[case::created(Created, false)]
    #[case::ready(Ready, false)]
    #[case::completed(Completed, true)]
    #[case::poisoned(Poisoned, false)]
    fn single_continuability(#[case] status: JobStatus, #[case] expected: bool) {
        assert_eq!(single(status).can_continue(), expected);
    }

    #[test]
    fn poisoned_single_with_completed_handler_continues_when_flagged() {
        let node = single(Poisoned)
            .with_on_all_failed(Some(single(Completed)))
            .with_continue_after_handling_failure(true);
        assert!(node.can_continue());
    }

    #[test]
    fn failure_handler_must_finish_its_own_chain() {
        let handler = single(Completed).with_next(Some(single(Created)));
        let node = single(Poisoned)
            .with_on_all_failed(Some(handler))
            .with_continue_after_handling_failure(true);
        assert!(!node.can_continue());
    }

    #[test]
    fn created_and_ready_singles_are_pending() {
        let created = single(Created);
        let ready = single(Ready);
        assert_eq!(created.pending_ids(), vec![created.id.unwrap()]);
        assert_eq!(ready.pending_ids(), vec![ready.id.unwrap()]);
    }

    #[test]
    fn completed_single_yields_its_next() {
        let next = single(Created);
        let next_id = next.id.unwrap();
        let node = single(Completed).with_next(Some(next));
        assert_eq!(node.pending_ids(), vec![next_id]);
    }

    #[test]
    fn poisoned_single_yields_its_failure_handler() {
        let handler = single(Created);
        let handler_id = handler.id.unwrap();
        let node = single(Poisoned)
            .with_on_all_failed(Some(handler))
            .with_next(Some(single(Created)));
        assert_eq!(node.pending_ids(), vec![handler_id]);
    }

    #[test]
    fn poisoned_single_falls_through_to_next_only_when_flagged() {
        let next = single(Created);
        let next_id = next.id.unwrap();

        let stuck = single(Poisoned).with_next(Some(next.clone()));
        assert!(stuck.pending().is_empty());

        let continuing = single(Poisoned)
            .with_next(Some(next))
            .with_continue_after_handling_failure(true);
        assert_eq!(continuing.pending_ids(), vec![next_id]);
    }

    #[test]
    fn resolved_parallel_group_yields_exactly_next() {
        let next = single(Created);
        let next_id = next.id.unwrap();
        let group = Continuation::parallel(vec![single(Completed), single(Completed)])
            .with_next(Some(next));

        assert_eq!(group.pending_ids(), vec![next_id]);
    }

    #[test]
    fn parallel_group_with_unhandled_poisoned_child_is_stuck() {
        let group = Continuation::parallel(vec![single(Poisoned)]);
        assert!(group.pending().is_empty());
        assert!(!group.can_continue());
    }

    #[test]
    fn parallel_group_yields_every_outstanding_child() {
        let a = single(Created);
        let b = single(Ready);
        let ids = vec![a.id.unwrap(), b.id.unwrap()];
        let group = Continuation::parallel(vec![a, single(Completed), b]);
        assert_eq!(group.pending_ids(), ids);
    }

    #[test]
    fn sequence_yields_first_unresolved_child() {
        let second = single(Created);
        let second_id = second.id.unwrap();
        let group = Continuation::sequence(vec![single(Completed), second, single(Created)]);

        assert_eq!(group.pending_ids(), vec![second_id]);
    }

    #[test]
    fn sequence_stops_at_first_failed_child() {
        let group = Continuation::sequence(vec![single(Poisoned), single(Created)]);
        assert!(group.pending().is_empty());
    }

    #[test]
    fn sequence_continues_past_handled_failure() {
        let third = single(Created);
        let third_id = third.id.unwrap();
        let handled = single(Poisoned)
            .with_on_all_failed(Some(single(Completed)))
            .with_continue_after_handling_failure(true);
        let group = Continuation::sequence(vec![single(Completed), handled, third]);

        assert_eq!(group.pending_ids(), vec![third_id]);
    }

    #[test]
    fn partial_failure_runs_any_failed_handler_only() {
        let any = single(Created);
        let any_id = any.id.unwrap();
        let group = Continuation::parallel(vec![single(Completed), single(Poisoned)])
            .with_on_any_failed(Some(any))
            .with_on_all_failed(Some(single(Created)));

        assert_eq!(group.pending_ids(), vec![any_id]);
    }

    #[test]
    fn total_failure_runs_both_handlers() {
        let any = single(Created);
        let all = single(Created);
        let ids = vec![any.id.unwrap(), all.id.unwrap()];
        let group = Continuation::parallel(vec![single(Poisoned), single(Poisoned)])
            .with_on_any_failed(Some(any))
            .with_on_all_failed(Some(all));

        assert_eq!(group.pending_ids(), ids);
    }

    #[test]
    fn handled_group_moves_on_to_next_when_flagged() {
        let next = single(Created);
        let next_id = next.id.unwrap();
        let group = Continuation::parallel(vec![single(Completed), single(Poisoned)])
            .with_on_any_failed(Some(single(Completed)))
            .with_next(Some(next))
            .with_continue_after_handling_failure(true);

        assert_eq!(group.pending_ids(), vec![next_id]);
        assert!(group.can_continue());
    }

    #[test]
    fn handled_group_without_flag_stops() {
        let group = Continuation::parallel(vec![single(Completed), single(Poisoned)])
            .with_on_any_failed(Some(single(Completed)))
            .with_next(Some(single(Created)));

        assert!(group.pending().is_empty());
        assert!(!group.can_continue());
    }

    #[test]
    fn all_failed_group_needs_both_handlers_to_continue() {
        let group = Continuation::parallel(vec![single(Poisoned)])
            .with_on_any_failed(Some(single(Completed)))
            .with_on_all_failed(Some(single(Poisoned)))
            .with_continue_after_handling_failure(true);

        assert!(!group.can_continue());
    }

    #[test]
    fn nested_groups_propagate_pending_children() {
        let leaf = single(Created);
        let leaf_id = leaf.id.unwrap();
        let inner = Continuation::parallel(vec![single(Completed), leaf]);
        let outer = Continuation::sequence(vec![single(Completed), inner, single(Created)]);

        assert_eq!(outer.pending_ids(), vec![leaf_id]);
    }

    #[test]
    fn find_searches_branches_then_children() {
        let handler = single(Created);
        let handler_id = handler.id.unwrap();
        let child = single(Created);
        let child_id = child.id.unwrap();
        let next = single(Created);
        let next_id = next.id.unwrap();

        let tree = Continuation::sequence(vec![single(Completed), child])
            .with_on_any_failed(Some(handler))
            .with_next(Some(next));

        assert_eq!(tree.find(handler_id).and_then(|n| n.id), Some(handler_id));
        assert_eq!(tree.find(child_id).and_then(|n| n.id), Some(child_id));
        assert_eq!(tree.find(next_id).and_then(|n| n.id), Some(next_id));
        assert!(tree.find(id()).is_none());
    }

    #[test]
    fn set_status_updates_the_matching_node_only() {
        let a = single(Ready);
        let b = single(Ready);
        let a_id = a.id.unwrap();
        let b_id = b.id.unwrap();
        let mut tree = Continuation::parallel(vec![a, b]);

        assert!(tree.set_status(a_id, Completed));
        assert_eq!(tree.find(a_id).unwrap().status, Completed);
        assert_eq!(tree.find(b_id).unwrap().status, Ready);
        assert_eq!(tree.pending_ids(), vec![b_id]);
        assert!(!tree.set_status(id(), Completed));
    }
}
