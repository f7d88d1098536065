// src/daemon/context.rs
// Process-wide daemon context, built once and handed to every component

use crate::daemon::state::DaemonState;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared state store, cancellation token and task tracker.
///
/// Cloning is cheap; every clone observes the same token and tracker.
#[derive(Clone)]
pub struct DaemonContext {
    state: Arc<DaemonState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    base_dir: Arc<PathBuf>,
}

impl DaemonContext {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DaemonContext {
            state: Arc::new(DaemonState::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            base_dir: Arc::new(base_dir.into()),
        }
    }

    pub fn state(&self) -> &Arc<DaemonState> {
        &self.state
    }

    /// Child observers get a clone; only the shutdown coordinator cancels.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Spawn a long-running task registered with the tracker at launch.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Launching tracked task");
        self.tracker.spawn(async move {
            let _exit = scopeguard::guard(name, |name| {
                tracing::debug!(task = name, persist = false, "Tracked task exited");
            });
            task.await;
        })
    }
}
