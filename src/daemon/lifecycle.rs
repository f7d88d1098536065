// src/daemon/lifecycle.rs
// Ordered subsystem initialization, background launch and teardown

use crate::daemon::context::DaemonContext;
use crate::daemon::error::DaemonResult;
use crate::daemon::subsystem::{
    AuditLogger, Enforcer, EventMonitor, ReadySignal, SubsystemFactory, SubsystemKind,
    SubsystemSlot, SubsystemState,
};
use crate::utils::logger::Timer;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Opaque options passed through to the collaborators
#[derive(Debug, Clone)]
pub struct SubsystemOptions {
    pub audit_log: String,
    pub system_log: String,
    pub readiness_timeout: Duration,
}

impl Default for SubsystemOptions {
    fn default() -> Self {
        SubsystemOptions {
            audit_log: "none".to_string(),
            system_log: "none".to_string(),
            readiness_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    AllReady,
    /// Not every loop acknowledged within the readiness timeout
    TimedOut { acknowledged: usize, expected: usize },
}

pub struct LifecycleManager {
    ctx: DaemonContext,
    factory: Arc<dyn SubsystemFactory>,
    options: SubsystemOptions,
    enforcer: SubsystemSlot<dyn Enforcer>,
    audit_logger: SubsystemSlot<dyn AuditLogger>,
    event_monitor: SubsystemSlot<dyn EventMonitor>,
}

impl LifecycleManager {
    pub fn new(
        ctx: DaemonContext,
        factory: Arc<dyn SubsystemFactory>,
        options: SubsystemOptions,
    ) -> Self {
        LifecycleManager {
            ctx,
            factory,
            options,
            enforcer: SubsystemSlot::new(SubsystemKind::Enforcer),
            audit_logger: SubsystemSlot::new(SubsystemKind::AuditLogger),
            event_monitor: SubsystemSlot::new(SubsystemKind::EventMonitor),
        }
    }

    pub fn state_of(&self, kind: SubsystemKind) -> SubsystemState {
        match kind {
            SubsystemKind::Enforcer => self.enforcer.state(),
            SubsystemKind::AuditLogger => self.audit_logger.state(),
            SubsystemKind::EventMonitor => self.event_monitor.state(),
        }
    }

    /// Initialize the enforcer, audit logger and event monitor, strictly in
    /// that order. The first failure stops the sequence; subsystems that had
    /// already reached `Running` are closed, newest first, before the error
    /// is returned.
    pub fn initialize(&mut self) -> DaemonResult<()> {
        let timer = Timer::new("subsystem initialization");

        let steps: [fn(&mut Self) -> DaemonResult<()>; 3] = [
            Self::init_enforcer,
            Self::init_audit_logger,
            Self::init_event_monitor,
        ];
        for step in steps {
            if let Err(e) = step(self) {
                error!(error = %e, "Subsystem initialization failed, aborting startup");
                self.unwind();
                return Err(e);
            }
        }

        timer.log_completion();
        Ok(())
    }

    fn init_enforcer(&mut self) -> DaemonResult<()> {
        self.enforcer.advance(SubsystemState::Initializing)?;
        let enforcer = self.factory.enforcer(self.ctx.base_dir())?;
        self.enforcer.attach(enforcer);
        self.enforcer.advance(SubsystemState::Running)?;
        info!("Started to protect containers");
        Ok(())
    }

    fn init_audit_logger(&mut self) -> DaemonResult<()> {
        self.audit_logger.advance(SubsystemState::Initializing)?;
        let logger = self
            .factory
            .audit_logger(&self.options.audit_log, Arc::clone(self.ctx.state()))?;
        self.audit_logger.attach(Arc::clone(&logger));
        logger.initialize(self.ctx.base_dir())?;
        self.audit_logger.advance(SubsystemState::Running)?;
        info!("Started to monitor audit logs");
        Ok(())
    }

    fn init_event_monitor(&mut self) -> DaemonResult<()> {
        self.event_monitor.advance(SubsystemState::Initializing)?;
        let monitor = self
            .factory
            .event_monitor(&self.options.system_log, Arc::clone(self.ctx.state()))?;
        self.event_monitor.attach(Arc::clone(&monitor));
        monitor.initialize_probe(self.ctx.base_dir())?;
        self.event_monitor.advance(SubsystemState::Running)?;
        info!("Started to monitor system events");
        Ok(())
    }

    /// Spawn every background loop through the task tracker, then wait until
    /// each has acknowledged readiness or the readiness timeout elapses.
    pub async fn launch(&mut self) -> DaemonResult<Readiness> {
        let audit_logger = self.audit_logger.running()?;
        let event_monitor = self.event_monitor.running()?;
        let mut acks = Vec::with_capacity(4);

        let (ready, rx) = ReadySignal::new("audit log tailing");
        acks.push(rx);
        let token = self.ctx.shutdown_token();
        let logger = Arc::clone(&audit_logger);
        self.ctx.spawn("audit-log-tailing", async move {
            logger.monitor_audit_logs(token, ready).await;
        });

        let (ready, rx) = ReadySignal::new("process event tracing");
        acks.push(rx);
        let token = self.ctx.shutdown_token();
        let monitor = Arc::clone(&event_monitor);
        self.ctx.spawn("process-event-tracing", async move {
            monitor.trace_process_events(token, ready).await;
        });

        let (ready, rx) = ReadySignal::new("network event tracing");
        acks.push(rx);
        let token = self.ctx.shutdown_token();
        let monitor = Arc::clone(&event_monitor);
        self.ctx.spawn("network-event-tracing", async move {
            monitor.trace_network_events(token, ready).await;
        });

        let (ready, rx) = ReadySignal::new("system log flushing");
        acks.push(rx);
        let token = self.ctx.shutdown_token();
        let monitor = Arc::clone(&event_monitor);
        self.ctx.spawn("system-log-flushing", async move {
            monitor.flush_system_logs(token, ready).await;
        });

        let expected = acks.len();
        let deadline = tokio::time::Instant::now() + self.options.readiness_timeout;
        let results = join_all(
            acks.into_iter()
                .map(|rx| tokio::time::timeout_at(deadline, rx)),
        )
        .await;
        let mut acknowledged = 0;
        for name in results.into_iter().filter_map(|r| r.ok()?.ok()) {
            info!(subsystem_loop = name, "Background loop ready");
            acknowledged += 1;
        }
        let readiness = if acknowledged == expected {
            Readiness::AllReady
        } else {
            Readiness::TimedOut { acknowledged, expected }
        };

        if let Readiness::TimedOut { acknowledged, expected } = readiness {
            warn!(
                acknowledged,
                expected,
                timeout = ?self.options.readiness_timeout,
                "Not every background loop reported ready, continuing startup"
            );
        }
        Ok(readiness)
    }

    /// Close the enforcer, audit logger and event monitor, in that order.
    /// Only running subsystems are closed; calling this twice is a no-op.
    pub fn teardown(&mut self) {
        close_slot(&mut self.enforcer, |e| e.destroy());
        close_slot(&mut self.audit_logger, |a| a.destroy());
        close_slot(&mut self.event_monitor, |m| m.destroy());
    }

    /// Close running subsystems newest first. Used when startup aborts.
    fn unwind(&mut self) {
        close_slot(&mut self.event_monitor, |m| m.destroy());
        close_slot(&mut self.audit_logger, |a| a.destroy());
        close_slot(&mut self.enforcer, |e| e.destroy());
    }
}

fn close_slot<T: ?Sized>(slot: &mut SubsystemSlot<T>, destroy: impl FnOnce(&T)) {
    if slot.state() != SubsystemState::Running {
        return;
    }
    if slot.advance(SubsystemState::Closing).is_err() {
        return;
    }
    if let Some(handle) = slot.handle() {
        destroy(handle.as_ref());
    }
    let _ = slot.advance(SubsystemState::Closed);
    info!(persist = false, "Closed the {}", slot.kind());
}
