//! RecoverableAction - safety net around state-changing work.
//!
//! A non-fatal failure parks a [`Command`] in the retry backlog, reports the
//! error as an exception event and lets the caller carry on. The recoverable
//! timer drains the backlog and re-submits every command. Permanent failures
//! are reported once and dropped, since a replay cannot succeed. Fatal errors
//! are returned unchanged.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::app::commands::Command;
use crate::domain::{EngineError, EngineEvent, ErrorKind};
use crate::ports::EventSink;

pub struct RecoverableAction {
    backlog: Mutex<VecDeque<Command>>,
    events: Arc<dyn EventSink>,
}

impl RecoverableAction {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            backlog: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Awaits `action`. `Ok(None)` means it failed: `recovery` was parked, or
    /// dropped when the failure is permanent.
    pub async fn run<T, F>(&self, action: F, recovery: Command) -> Result<Option<T>, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match action.await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_fatal() => Err(error),
            Err(failure) if failure.kind() == ErrorKind::Permanent => {
                error!(
                    job_id = %recovery.job_id,
                    command = ?recovery.kind,
                    error = %failure,
                    "action failed permanently, dropped"
                );
                self.events.publish(EngineEvent::exception(None, &failure));
                Ok(None)
            }
            Err(error) => {
                warn!(
                    job_id = %recovery.job_id,
                    command = ?recovery.kind,
                    %error,
                    "action failed, parked for retry"
                );
                self.events.publish(EngineEvent::exception(None, &error));
                self.lock().push_back(recovery);
                Ok(None)
            }
        }
    }

    /// Takes every parked command, oldest first.
    pub fn drain(&self) -> Vec<Command> {
        self.lock().drain(..).collect()
    }

    pub fn backlog_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Command>> {
        self.backlog.lock().unwrap_or_else(|e| e.into_inner())
    }
}
