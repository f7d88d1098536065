// src/daemon/config.rs
// Resolved daemon configuration

use crate::audit::DEFAULT_AUDIT_SOURCE;
use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::lifecycle::SubsystemOptions;
use crate::enforcer::DEFAULT_LSM_PATH;
use crate::monitor::DEFAULT_PROC_ROOT;
use crate::utils::sink::LogDestination;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub base_dir: PathBuf,
    /// `stdout`, `none`, or a file path; interpreted by the audit logger
    pub audit_log: String,
    /// `stdout`, `none`, or a file path; interpreted by the event monitor
    pub system_log: String,
    /// Orchestration feed directory. `None` runs in degraded mode.
    pub feed_dir: Option<PathBuf>,
    pub audit_source: PathBuf,
    pub proc_root: PathBuf,
    pub lsm_path: PathBuf,
    pub readiness_timeout: Duration,
    pub drain_timeout: Duration,
    pub flush_interval: Duration,
    pub scan_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            base_dir: PathBuf::from("."),
            audit_log: "none".to_string(),
            system_log: "none".to_string(),
            feed_dir: None,
            audit_source: PathBuf::from(DEFAULT_AUDIT_SOURCE),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            lsm_path: PathBuf::from(DEFAULT_LSM_PATH),
            readiness_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(10),
            flush_interval: Duration::from_secs(1),
            scan_interval: Duration::from_millis(500),
        }
    }
}

impl DaemonConfig {
    /// Reject configurations the daemon could never start with.
    pub fn validate(&self) -> DaemonResult<()> {
        if !self.base_dir.is_dir() {
            return Err(DaemonError::Config {
                message: format!("base directory {} does not exist", self.base_dir.display()),
            });
        }
        LogDestination::parse(&self.audit_log)?;
        LogDestination::parse(&self.system_log)?;

        for (name, value) in [
            ("readiness-timeout", self.readiness_timeout),
            ("drain-timeout", self.drain_timeout),
            ("flush-interval", self.flush_interval),
            ("scan-interval", self.scan_interval),
        ] {
            if value.is_zero() {
                return Err(DaemonError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }

    pub fn subsystem_options(&self) -> SubsystemOptions {
        SubsystemOptions {
            audit_log: self.audit_log.clone(),
            system_log: self.system_log.clone(),
            readiness_timeout: self.readiness_timeout,
        }
    }
}
