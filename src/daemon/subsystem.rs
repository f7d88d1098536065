// src/daemon/subsystem.rs
// Collaborator contracts and the per-subsystem lifecycle state machine

use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::state::DaemonState;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
    Enforcer,
    AuditLogger,
    EventMonitor,
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubsystemKind::Enforcer => "runtime enforcer",
            SubsystemKind::AuditLogger => "audit logger",
            SubsystemKind::EventMonitor => "event monitor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubsystemState {
    Uninitialized,
    Initializing,
    Running,
    Closing,
    Closed,
}

impl SubsystemState {
    fn next(self) -> Option<SubsystemState> {
        match self {
            SubsystemState::Uninitialized => Some(SubsystemState::Initializing),
            SubsystemState::Initializing => Some(SubsystemState::Running),
            SubsystemState::Running => Some(SubsystemState::Closing),
            SubsystemState::Closing => Some(SubsystemState::Closed),
            SubsystemState::Closed => None,
        }
    }
}

impl fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubsystemState::Uninitialized => "uninitialized",
            SubsystemState::Initializing => "initializing",
            SubsystemState::Running => "running",
            SubsystemState::Closing => "closing",
            SubsystemState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Holds one subsystem handle together with its lifecycle state.
///
/// States only ever advance one step at a time:
/// uninitialized -> initializing -> running -> closing -> closed.
/// A handle that failed to initialize stays in `Initializing`.
pub struct SubsystemSlot<T: ?Sized> {
    kind: SubsystemKind,
    state: SubsystemState,
    handle: Option<Arc<T>>,
}

impl<T: ?Sized> SubsystemSlot<T> {
    pub fn new(kind: SubsystemKind) -> Self {
        SubsystemSlot {
            kind,
            state: SubsystemState::Uninitialized,
            handle: None,
        }
    }

    pub fn kind(&self) -> SubsystemKind {
        self.kind
    }

    pub fn state(&self) -> SubsystemState {
        self.state
    }

    pub fn advance(&mut self, to: SubsystemState) -> DaemonResult<()> {
        if self.state.next() != Some(to) {
            return Err(DaemonError::InvalidTransition {
                subsystem: self.kind,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn attach(&mut self, handle: Arc<T>) {
        self.handle = Some(handle);
    }

    /// Handle, available only while the subsystem is running
    pub fn running(&self) -> DaemonResult<Arc<T>> {
        match (&self.handle, self.state) {
            (Some(handle), SubsystemState::Running) => Ok(Arc::clone(handle)),
            _ => Err(DaemonError::InvalidTransition {
                subsystem: self.kind,
                from: self.state,
                to: SubsystemState::Running,
            }),
        }
    }

    pub fn handle(&self) -> Option<Arc<T>> {
        self.handle.clone()
    }
}

/// One-shot readiness acknowledgement handed to each background loop
pub struct ReadySignal {
    name: &'static str,
    tx: Option<oneshot::Sender<&'static str>>,
}

impl ReadySignal {
    pub fn new(name: &'static str) -> (Self, oneshot::Receiver<&'static str>) {
        let (tx, rx) = oneshot::channel();
        (ReadySignal { name, tx: Some(tx) }, rx)
    }

    /// Tell the lifecycle manager the loop is receiving events. Later calls are no-ops.
    pub fn ready(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(self.name);
        }
    }
}

/// Applies enforcement decisions at the kernel access-control layer
pub trait Enforcer: Send + Sync {
    fn destroy(&self);
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    fn initialize(&self, base_dir: &Path) -> DaemonResult<()>;

    /// Tail audit records until `shutdown` fires.
    async fn monitor_audit_logs(&self, shutdown: CancellationToken, ready: ReadySignal);

    fn destroy(&self);
}

#[async_trait]
pub trait EventMonitor: Send + Sync {
    fn initialize_probe(&self, base_dir: &Path) -> DaemonResult<()>;

    /// Sole writer of the attribution map.
    async fn trace_process_events(&self, shutdown: CancellationToken, ready: ReadySignal);

    async fn trace_network_events(&self, shutdown: CancellationToken, ready: ReadySignal);

    async fn flush_system_logs(&self, shutdown: CancellationToken, ready: ReadySignal);

    fn destroy(&self);
}

/// Construction seam for the three subsystems
#[cfg_attr(test, mockall::automock)]
pub trait SubsystemFactory: Send + Sync {
    fn enforcer(&self, base_dir: &Path) -> DaemonResult<Arc<dyn Enforcer>>;

    fn audit_logger(
        &self,
        audit_log_option: &str,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn AuditLogger>>;

    fn event_monitor(
        &self,
        system_log_option: &str,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn EventMonitor>>;
}
