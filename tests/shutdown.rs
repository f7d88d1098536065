// Full startup -> SIGTERM -> drain path against recording collaborators

use async_trait::async_trait;
use nix::sys::signal::{raise, Signal};
use parking_lot::Mutex;
use podguard::daemon::error::{DaemonError, DaemonResult};
use podguard::daemon::state::DaemonState;
use podguard::daemon::subsystem::{
    AuditLogger, Enforcer, EventMonitor, ReadySignal, SubsystemFactory,
};
use podguard::daemon::types::{Container, Pod, SecurityPolicy};
use podguard::daemon::{Daemon, DaemonConfig, DrainOutcome, Readiness};
use podguard::watchers::{BoxSource, OrchestrationClient, RuntimeFlavor, WatcherLaunch};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Calls(Mutex<Vec<&'static str>>);

impl Calls {
    fn push(&self, call: &'static str) {
        self.0.lock().push(call);
    }

    fn all(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

struct RecordingEnforcer(Arc<Calls>);

impl Enforcer for RecordingEnforcer {
    fn destroy(&self) {
        self.0.push("enforcer.destroy");
    }
}

struct RecordingAuditLogger(Arc<Calls>);

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    fn initialize(&self, _base_dir: &Path) -> DaemonResult<()> {
        Ok(())
    }

    async fn monitor_audit_logs(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        ready.ready();
        shutdown.cancelled().await;
        self.0.push("audit.exit");
    }

    fn destroy(&self) {
        self.0.push("audit.destroy");
    }
}

struct RecordingEventMonitor(Arc<Calls>);

#[async_trait]
impl EventMonitor for RecordingEventMonitor {
    fn initialize_probe(&self, _base_dir: &Path) -> DaemonResult<()> {
        Ok(())
    }

    async fn trace_process_events(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        ready.ready();
        shutdown.cancelled().await;
        self.0.push("process.exit");
    }

    async fn trace_network_events(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        ready.ready();
        shutdown.cancelled().await;
        self.0.push("network.exit");
    }

    async fn flush_system_logs(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        ready.ready();
        shutdown.cancelled().await;
        // Final flush after cancellation
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.push("flush.exit");
    }

    fn destroy(&self) {
        self.0.push("monitor.destroy");
    }
}

struct RecordingFactory(Arc<Calls>);

impl SubsystemFactory for RecordingFactory {
    fn enforcer(&self, _base_dir: &Path) -> DaemonResult<Arc<dyn Enforcer>> {
        Ok(Arc::new(RecordingEnforcer(Arc::clone(&self.0))))
    }

    fn audit_logger(
        &self,
        _audit_log_option: &str,
        _state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn AuditLogger>> {
        Ok(Arc::new(RecordingAuditLogger(Arc::clone(&self.0))))
    }

    fn event_monitor(
        &self,
        _system_log_option: &str,
        _state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn EventMonitor>> {
        Ok(Arc::new(RecordingEventMonitor(Arc::clone(&self.0))))
    }
}

struct OfflineCluster;

#[async_trait]
impl OrchestrationClient for OfflineCluster {
    async fn try_connect(&self) -> DaemonResult<()> {
        Err(DaemonError::OrchestrationUnavailable {
            message: "offline".to_string(),
        })
    }

    async fn container_runtime(&self) -> DaemonResult<String> {
        unreachable!("not connected")
    }

    async fn runtime_events(&self, _flavor: RuntimeFlavor) -> DaemonResult<BoxSource<Container>> {
        unreachable!("not connected")
    }

    async fn pod_events(&self) -> DaemonResult<BoxSource<Pod>> {
        unreachable!("not connected")
    }

    async fn policy_events(&self) -> DaemonResult<BoxSource<SecurityPolicy>> {
        unreachable!("not connected")
    }
}

#[tokio::test]
async fn test_sigterm_after_steady_state_drains_in_order() {
    let base = TempDir::new().unwrap();
    let calls = Arc::new(Calls::default());
    let config = DaemonConfig {
        base_dir: base.path().to_path_buf(),
        drain_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let daemon = Daemon::with_collaborators(
        config,
        Arc::new(RecordingFactory(Arc::clone(&calls))),
        Arc::new(OfflineCluster),
    )
    .unwrap();
    let ctx = daemon.context().clone();

    let observer = ctx.clone();
    let trigger = async move {
        tokio::time::timeout(Duration::from_secs(5), async {
            while observer.tracker().len() < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!observer.is_shutting_down());
        raise(Signal::SIGTERM).unwrap();
    };

    let (report, ()) = tokio::join!(daemon.run(), trigger);
    let report = report.unwrap();

    assert_eq!(report.signal, "SIGTERM");
    assert_eq!(report.readiness, Readiness::AllReady);
    assert_eq!(report.watchers, WatcherLaunch::Degraded);
    assert_eq!(report.drain, DrainOutcome::Drained);
    assert!(ctx.is_shutting_down());
    assert!(ctx.tracker().is_empty());

    let calls = calls.all();
    let destroys: Vec<_> = calls
        .iter()
        .copied()
        .filter(|c| c.ends_with(".destroy"))
        .collect();
    assert_eq!(
        destroys,
        vec!["enforcer.destroy", "audit.destroy", "monitor.destroy"]
    );
    for exit in ["audit.exit", "process.exit", "network.exit", "flush.exit"] {
        assert_eq!(calls.iter().filter(|c| **c == exit).count(), 1, "{}", exit);
    }
}
