//! JobCoordinator - per-tree serialization of state-changing actions.
//!
//! Every job tree (shared `root_id`) gets a FIFO of pending actions. Whoever
//! enqueues into an idle tree becomes its processor and drains the FIFO one
//! action at a time; everybody else just enqueues and returns. The bookkeeping
//! mutex is only held to push, pop and remove, never across an action.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::app::commands::Command;
use crate::app::recoverable::RecoverableAction;
use crate::domain::{EngineError, JobId};

pub type CoordinatedAction = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

type Pending = VecDeque<(CoordinatedAction, Command)>;

pub struct JobCoordinator {
    trees: Mutex<HashMap<JobId, Pending>>,
    recoverable: Arc<RecoverableAction>,
}

impl JobCoordinator {
    pub fn new(recoverable: Arc<RecoverableAction>) -> Self {
        Self {
            trees: Mutex::new(HashMap::new()),
            recoverable,
        }
    }

    /// Queues `action` behind everything already queued for `root_id`.
    ///
    /// Returns once the queue is drained if this call became the processor,
    /// immediately otherwise. Non-fatal failures park `recovery`; a fatal one
    /// stops the processor, drops the rest of the tree's queue and is returned.
    pub async fn run(
        &self,
        root_id: JobId,
        action: CoordinatedAction,
        recovery: Command,
    ) -> Result<(), EngineError> {
        {
            let mut trees = self.lock();
            if let Some(pending) = trees.get_mut(&root_id) {
                pending.push_back((action, recovery));
                return Ok(());
            }
            trees.insert(root_id, VecDeque::from([(action, recovery)]));
        }

        loop {
            let next = {
                let mut trees = self.lock();
                match trees.get_mut(&root_id).and_then(VecDeque::pop_front) {
                    Some(next) => next,
                    None => {
                        trees.remove(&root_id);
                        return Ok(());
                    }
                }
            };

            let (action, recovery) = next;
            if let Err(error) = self.recoverable.run(action, recovery).await {
                let dropped = self.lock().remove(&root_id).map_or(0, |p| p.len());
                debug!(root_id = %root_id, dropped, "coordinator stopped on fatal error");
                return Err(error);
            }
        }
    }

    /// Trees with queued or running actions.
    pub fn active_trees(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Pending>> {
        self.trees.lock().unwrap_or_else(|e| e.into_inner())
    }
}
