// src/enforcer.rs
// Host runtime enforcer: detects the active LSM enforcement backend

use crate::daemon::subsystem::Enforcer;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_LSM_PATH: &str = "/sys/kernel/security/lsm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerBackend {
    AppArmor,
    SELinux,
    /// No supported LSM; policies are audited but not enforced
    AuditOnly,
}

impl EnforcerBackend {
    /// Parse the comma-separated module list from securityfs.
    pub fn from_lsm_list(list: &str) -> EnforcerBackend {
        let modules: Vec<&str> = list.trim().split(',').map(str::trim).collect();
        if modules.contains(&"apparmor") {
            EnforcerBackend::AppArmor
        } else if modules.contains(&"selinux") {
            EnforcerBackend::SELinux
        } else {
            EnforcerBackend::AuditOnly
        }
    }
}

pub struct HostEnforcer {
    base_dir: PathBuf,
    backend: EnforcerBackend,
}

impl HostEnforcer {
    pub fn new(base_dir: &Path, lsm_path: &Path) -> Self {
        let backend = match fs::read_to_string(lsm_path) {
            Ok(list) => EnforcerBackend::from_lsm_list(&list),
            Err(e) => {
                warn!(path = %lsm_path.display(), error = %e, "Cannot read active LSMs");
                EnforcerBackend::AuditOnly
            }
        };
        if !nix::unistd::geteuid().is_root() {
            warn!("Not running as root, enforcement profiles cannot be loaded");
        }
        info!(backend = ?backend, base_dir = %base_dir.display(), "Runtime enforcer ready");

        HostEnforcer {
            base_dir: base_dir.to_path_buf(),
            backend,
        }
    }

    pub fn backend(&self) -> EnforcerBackend {
        self.backend
    }
}

impl Enforcer for HostEnforcer {
    fn destroy(&self) {
        info!(
            persist = false,
            backend = ?self.backend,
            base_dir = %self.base_dir.display(),
            "Runtime enforcer released"
        );
    }
}
