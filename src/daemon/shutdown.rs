// src/daemon/shutdown.rs
// Termination signal handling and the cooperative drain sequence

use crate::daemon::context::DaemonContext;
use crate::daemon::lifecycle::LifecycleManager;
use crate::utils::logger::Timer;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn};

/// Catchable termination signals.
///
/// SIGKILL cannot be intercepted by any user-space handler, so a forced kill
/// always bypasses the drain sequence.
pub struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
    hangup: Signal,
}

impl TerminationSignals {
    /// Install the handlers. Must run inside a tokio runtime.
    pub fn register() -> io::Result<Self> {
        Ok(TerminationSignals {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the first termination signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.quit.recv() => "SIGQUIT",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every tracked task exited
    Drained,
    /// Tracked tasks were still running when the drain timeout elapsed
    TimedOut { remaining: usize },
}

/// Fires the shared cancellation token exactly once and drains tracked tasks.
pub struct ShutdownCoordinator {
    ctx: DaemonContext,
    fired: AtomicBool,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(ctx: DaemonContext, drain_timeout: Duration) -> Self {
        ShutdownCoordinator {
            ctx,
            fired: AtomicBool::new(false),
            drain_timeout,
        }
    }

    /// Cancel the shared token. Only the first call has any effect; every
    /// later call returns false without touching the token.
    pub fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(persist = false, "Cancellation already fired, ignoring");
            return false;
        }
        self.ctx.shutdown_token().cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Strictly ordered: fire, tear down subsystems, wait for tracked tasks.
    pub async fn drain(&self, lifecycle: &mut LifecycleManager) -> DrainOutcome {
        let timer = Timer::new("shutdown drain");
        self.fire();

        lifecycle.teardown();

        info!(persist = false, "Waiting for routine terminations");
        let tracker = self.ctx.tracker();
        tracker.close();
        let outcome = match tokio::time::timeout(self.drain_timeout, tracker.wait()).await {
            Ok(()) => DrainOutcome::Drained,
            Err(_) => DrainOutcome::TimedOut {
                remaining: tracker.len(),
            },
        };

        match outcome {
            DrainOutcome::Drained => info!(persist = false, "All tracked tasks exited"),
            DrainOutcome::TimedOut { remaining } => error!(
                remaining,
                timeout = ?self.drain_timeout,
                "Tracked tasks ignored cancellation, abandoning drain"
            ),
        }
        timer.log_completion();
        outcome
    }
}
