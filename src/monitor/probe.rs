// src/monitor/probe.rs
// Process probes: the source of process start/exit and network events

use crate::daemon::error::{DaemonError, DaemonResult};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessEvent {
    #[serde(rename_all = "camelCase")]
    ProcessStart {
        container_id: String,
        pid: u32,
        comm: String,
    },
    #[serde(rename_all = "camelCase")]
    ProcessExit { container_id: String, pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub container_id: String,
    pub pid: u32,
    pub protocol: String,
    pub detail: String,
}

/// Kernel-boundary event source used by the event monitor.
pub trait ProcessProbe: Send {
    /// Events observed since the previous call, in observation order.
    fn poll_events(&mut self) -> DaemonResult<Vec<ProcessEvent>>;

    /// Stream of network events, if this probe can observe them. Taken once.
    fn network_events(&mut self) -> Option<mpsc::Receiver<NetworkEvent>> {
        None
    }
}

fn container_id_pattern() -> Option<&'static Regex> {
    static ID: OnceLock<Option<Regex>> = OnceLock::new();
    ID.get_or_init(|| Regex::new(r"([0-9a-f]{64})").ok()).as_ref()
}

/// Container id embedded in a `/proc/<pid>/cgroup` file, covering the
/// docker, cri-containerd and plain cgroupfs layouts.
pub fn container_id_from_cgroup(contents: &str) -> Option<String> {
    let pattern = container_id_pattern()?;
    contents
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .find_map(|path| pattern.captures(path))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Diffs successive procfs scans into start/exit events.
pub struct ProcfsProbe {
    root: PathBuf,
    known: HashMap<u32, String>,
}

impl ProcfsProbe {
    pub fn new(root: impl Into<PathBuf>) -> DaemonResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DaemonError::Config {
                message: format!("{} is not a procfs mount", root.display()),
            });
        }
        Ok(ProcfsProbe {
            root,
            known: HashMap::new(),
        })
    }

    fn read_comm(&self, pid: u32) -> String {
        fs::read_to_string(self.root.join(pid.to_string()).join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn scan(&self) -> DaemonResult<HashMap<u32, String>> {
        let mut current = HashMap::new();
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes may exit mid-scan
            let Ok(cgroup) = fs::read_to_string(cgroup_path(&entry.path())) else {
                continue;
            };
            if let Some(container_id) = container_id_from_cgroup(&cgroup) {
                current.insert(pid, container_id);
            }
        }
        Ok(current)
    }
}

fn cgroup_path(pid_dir: &Path) -> PathBuf {
    pid_dir.join("cgroup")
}

impl ProcessProbe for ProcfsProbe {
    fn poll_events(&mut self) -> DaemonResult<Vec<ProcessEvent>> {
        let current = self.scan()?;
        let mut events = Vec::new();

        let mut exited: Vec<_> = self
            .known
            .iter()
            .filter(|(pid, container_id)| current.get(pid) != Some(*container_id))
            .map(|(pid, container_id)| (*pid, container_id.clone()))
            .collect();
        exited.sort_unstable();
        for (pid, container_id) in exited {
            events.push(ProcessEvent::ProcessExit { container_id, pid });
        }

        let mut started: Vec<_> = current
            .iter()
            .filter(|(pid, container_id)| self.known.get(pid) != Some(*container_id))
            .map(|(pid, container_id)| (*pid, container_id.clone()))
            .collect();
        started.sort_unstable();
        for (pid, container_id) in started {
            events.push(ProcessEvent::ProcessStart {
                comm: self.read_comm(pid),
                container_id,
                pid,
            });
        }

        self.known = current;
        Ok(events)
    }
}
