use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::envelope::Envelope;
use crate::errors::DispatchError;

/// Lifecycle of one dispatched worker. Reaches a final state exactly once,
/// either straight from `Running` or through `Completing`.
#[derive(Debug, Clone)]
pub enum WorkerState {
    Running,
    /// The watcher claimed the output and is delivering it; kill no longer applies.
    Completing,
    Completed(Envelope),
    Failed(DispatchError),
    Killed,
}

impl WorkerState {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerState::Running | WorkerState::Completing)
    }

    fn outcome(&self) -> Option<Result<Envelope, DispatchError>> {
        match self {
            WorkerState::Running | WorkerState::Completing => None,
            WorkerState::Completed(envelope) => Some(Ok(envelope.clone())),
            WorkerState::Failed(err) => Some(Err(err.clone())),
            WorkerState::Killed => Some(Err(DispatchError::Killed)),
        }
    }
}

struct ProcessInner {
    pid: Option<u32>,
    command: String,
    state: watch::Sender<WorkerState>,
    cancel: watch::Sender<bool>,
}

impl ProcessInner {
    fn claim(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, WorkerState::Running) {
                *state = WorkerState::Completing;
                true
            } else {
                false
            }
        })
    }

    fn kill(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, WorkerState::Running) {
                *state = WorkerState::Killed;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self, outcome: WorkerState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_running() {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }
}

/// Caller-side handle of a running worker, attached to the envelope returned
/// by `send`. Cloning shares the same worker.
#[derive(Clone)]
pub struct ProcessHandle(Arc<ProcessInner>);

impl ProcessHandle {
    /// Creates the handle together with the control half used by the output
    /// watcher.
    pub fn new(pid: Option<u32>, command: impl Into<String>) -> (ProcessHandle, WorkerControl) {
        let (state, _) = watch::channel(WorkerState::Running);
        let (cancel, cancel_rx) = watch::channel(false);
        let inner = Arc::new(ProcessInner {
            pid,
            command: command.into(),
            state,
            cancel,
        });
        (
            ProcessHandle(inner.clone()),
            WorkerControl {
                inner,
                cancel: cancel_rx,
            },
        )
    }

    pub fn pid(&self) -> Option<u32> {
        self.0.pid
    }

    pub fn command(&self) -> &str {
        &self.0.command
    }

    pub fn is_running(&self) -> bool {
        self.0.state.borrow().is_running()
    }

    /// Stops the worker. Its output is discarded and no reconciliation or
    /// handled event happens afterwards. Returns false once the worker finished
    /// or its output is already being delivered.
    pub fn kill(&self) -> bool {
        let killed = self.0.kill();
        if killed {
            self.0.cancel.send_replace(true);
            info!(pid = ?self.0.pid, "Killing background worker");
        }
        killed
    }

    /// Resolves once the worker finished, with the reconciled envelope or the
    /// reason it failed.
    pub async fn wait(&self) -> Result<Envelope, DispatchError> {
        let mut state = self.0.state.subscribe();
        let finished = state
            .wait_for(|state| !state.is_running())
            .await
            .map_err(|_| DispatchError::Abandoned)?;
        finished.outcome().unwrap_or(Err(DispatchError::Abandoned))
    }

    /// Non-blocking view of the outcome; `None` while running.
    pub fn outcome(&self) -> Option<Result<Envelope, DispatchError>> {
        self.0.state.borrow().outcome()
    }

    pub fn ptr_eq(&self, other: &ProcessHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.0.pid)
            .field("command", &self.0.command)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Watcher-side half of a [`ProcessHandle`]. Dropping it without finishing
/// fails the dispatch with [`DispatchError::Abandoned`].
pub struct WorkerControl {
    inner: Arc<ProcessInner>,
    cancel: watch::Receiver<bool>,
}

impl WorkerControl {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when the handle was killed.
    pub async fn cancelled(&mut self) {
        let _ = self.cancel.wait_for(|cancelled| *cancelled).await;
    }

    /// Takes exclusive ownership of delivering the outcome. Fails if the
    /// handle was killed or another claim won.
    pub fn claim(&self) -> bool {
        self.inner.claim()
    }

    /// Records the outcome unless one was recorded already.
    pub fn finish(&self, outcome: WorkerState) -> bool {
        self.inner.finish(outcome)
    }

    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle(self.inner.clone())
    }
}

impl Drop for WorkerControl {
    fn drop(&mut self) {
        self.inner
            .finish(WorkerState::Failed(DispatchError::Abandoned));
    }
}
