// src/audit.rs
// Audit log tailer: attributes host audit records to containers

use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::state::DaemonState;
use crate::daemon::subsystem::{AuditLogger, ReadySignal, SubsystemKind};
use crate::utils::sink::{LogDestination, LogSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_AUDIT_SOURCE: &str = "/var/log/audit/audit.log";

fn pid_pattern() -> Option<&'static Regex> {
    static PID: OnceLock<Option<Regex>> = OnceLock::new();
    PID.get_or_init(|| Regex::new(r"\bpid=(\d+)").ok()).as_ref()
}

/// First `pid=` field of a raw audit record
pub fn record_pid(line: &str) -> Option<u32> {
    pid_pattern()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: String,
    pub container_id: String,
    pub container_name: String,
    pub namespace: String,
    pub pid: u32,
    pub raw: String,
}

fn flush_sink(sink: &LogSink) {
    if let Err(e) = sink.flush() {
        warn!(error = %e, "Failed to flush audit log");
    }
}

pub struct AuditLogTailer {
    destination: LogDestination,
    source: PathBuf,
    poll_interval: Duration,
    state: Arc<DaemonState>,
    sink: Mutex<Option<Arc<LogSink>>>,
}

impl AuditLogTailer {
    pub fn new(
        audit_log_option: &str,
        source: PathBuf,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Self> {
        let destination = LogDestination::parse(audit_log_option)?;
        Ok(AuditLogTailer {
            destination,
            source,
            poll_interval: Duration::from_millis(500),
            state,
            sink: Mutex::new(None),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Attribute one raw record. Records from processes outside any tracked
    /// container yield `None`. Reads the attribution map, never writes it.
    pub fn attribute(&self, line: &str) -> Option<AuditRecord> {
        let pid = record_pid(line)?;
        let container_id = self.state.attribution().container_of(pid)?;
        let container = self.state.container(&container_id);
        Some(AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            container_name: container.as_ref().map(|c| c.name.clone()).unwrap_or_default(),
            namespace: container.map(|c| c.namespace).unwrap_or_default(),
            container_id,
            pid,
            raw: line.trim_end().to_string(),
        })
    }

    fn emit(&self, sink: &LogSink, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = sink.write_line(&json) {
                    warn!(error = %e, "Failed to write audit record");
                    return;
                }
                flush_sink(sink);
            }
            Err(e) => warn!(error = %e, "Failed to encode audit record"),
        }
    }

    /// Wait until the audit source exists, then position at its end.
    async fn open_source(&self, shutdown: &CancellationToken) -> Option<BufReader<tokio::fs::File>> {
        let mut warned = false;
        loop {
            match tokio::fs::File::open(&self.source).await {
                Ok(mut file) => {
                    if let Err(e) = file.seek(SeekFrom::End(0)).await {
                        warn!(error = %e, "Cannot seek audit source, reading from start");
                    }
                    return Some(BufReader::new(file));
                }
                Err(e) => {
                    if !warned {
                        warn!(source = %self.source.display(), error = %e, "Audit source unavailable, waiting");
                        warned = true;
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl AuditLogger for AuditLogTailer {
    fn initialize(&self, base_dir: &Path) -> DaemonResult<()> {
        let destination = match &self.destination {
            LogDestination::File(path) if path.is_relative() => {
                LogDestination::File(base_dir.join(path))
            }
            other => other.clone(),
        };
        let sink = LogSink::open(destination)
            .map_err(|e| DaemonError::init(SubsystemKind::AuditLogger, e.to_string()))?;
        *self.sink.lock() = Some(Arc::new(sink));
        Ok(())
    }

    async fn monitor_audit_logs(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            warn!("Audit logger was not initialized");
            return;
        };

        let Some(mut reader) = self.open_source(&shutdown).await else {
            return;
        };
        ready.ready();
        info!(source = %self.source.display(), "Tailing audit records");

        let mut line = String::new();
        let mut forwarded = 0u64;
        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                }
                Ok(_) if !line.ends_with('\n') => continue,
                Ok(_) => {
                    if let Some(record) = self.attribute(&line) {
                        self.emit(&sink, &record);
                        forwarded += 1;
                    }
                    line.clear();
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read audit source");
                    line.clear();
                }
            }
        }

        flush_sink(&sink);
        debug!(forwarded, "Audit log tailing stopped");
    }

    fn destroy(&self) {
        if let Some(sink) = self.sink.lock().take() {
            flush_sink(&sink);
        }
        info!(persist = false, "Audit logger released");
    }
}
