// src/host.rs
// Subsystem factory wiring the bundled host collaborators

use crate::audit::AuditLogTailer;
use crate::daemon::config::DaemonConfig;
use crate::daemon::error::DaemonResult;
use crate::daemon::state::DaemonState;
use crate::daemon::subsystem::{AuditLogger, Enforcer, EventMonitor, SubsystemFactory};
use crate::enforcer::HostEnforcer;
use crate::monitor::SystemMonitor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct HostSubsystems {
    lsm_path: PathBuf,
    audit_source: PathBuf,
    proc_root: PathBuf,
    scan_interval: Duration,
    flush_interval: Duration,
}

impl HostSubsystems {
    pub fn new(config: &DaemonConfig) -> Self {
        HostSubsystems {
            lsm_path: config.lsm_path.clone(),
            audit_source: config.audit_source.clone(),
            proc_root: config.proc_root.clone(),
            scan_interval: config.scan_interval,
            flush_interval: config.flush_interval,
        }
    }
}

impl SubsystemFactory for HostSubsystems {
    fn enforcer(&self, base_dir: &Path) -> DaemonResult<Arc<dyn Enforcer>> {
        Ok(Arc::new(HostEnforcer::new(base_dir, &self.lsm_path)))
    }

    fn audit_logger(
        &self,
        audit_log_option: &str,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn AuditLogger>> {
        let tailer = AuditLogTailer::new(audit_log_option, self.audit_source.clone(), state)?;
        Ok(Arc::new(tailer))
    }

    fn event_monitor(
        &self,
        system_log_option: &str,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Arc<dyn EventMonitor>> {
        let monitor = SystemMonitor::new(system_log_option, self.proc_root.clone(), state)?
            .with_intervals(self.scan_interval, self.flush_interval);
        Ok(Arc::new(monitor))
    }
}
