// src/monitor/mod.rs
// System event monitor: process attribution, network events, system log flushing

pub mod probe;

use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::state::DaemonState;
use crate::daemon::subsystem::{EventMonitor, ReadySignal, SubsystemKind};
use crate::utils::sink::{LogDestination, LogSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use probe::{NetworkEvent, ProcessEvent, ProcessProbe, ProcfsProbe};

pub const DEFAULT_PROC_ROOT: &str = "/proc";

#[derive(Serialize)]
struct SystemRecord<'a, E: Serialize> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a E,
}

fn encode<E: Serialize>(event: &E) -> Option<String> {
    let record = SystemRecord {
        timestamp: chrono::Utc::now().to_rfc3339(),
        event,
    };
    match serde_json::to_string(&record) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!(error = %e, "Failed to encode system event");
            None
        }
    }
}

pub struct SystemMonitor {
    destination: LogDestination,
    proc_root: PathBuf,
    scan_interval: Duration,
    flush_interval: Duration,
    state: Arc<DaemonState>,
    probe: Mutex<Option<Box<dyn ProcessProbe>>>,
    network: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,
    sink: Mutex<Option<Arc<LogSink>>>,
    pending: Mutex<Vec<String>>,
}

impl SystemMonitor {
    pub fn new(
        system_log_option: &str,
        proc_root: PathBuf,
        state: Arc<DaemonState>,
    ) -> DaemonResult<Self> {
        Ok(SystemMonitor {
            destination: LogDestination::parse(system_log_option)?,
            proc_root,
            scan_interval: Duration::from_millis(500),
            flush_interval: Duration::from_secs(1),
            state,
            probe: Mutex::new(None),
            network: Mutex::new(None),
            sink: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn with_intervals(mut self, scan_interval: Duration, flush_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self.flush_interval = flush_interval;
        self
    }

    /// Use a specific probe instead of scanning procfs at `proc_root`.
    pub fn with_probe(self, probe: Box<dyn ProcessProbe>) -> Self {
        *self.probe.lock() = Some(probe);
        self
    }

    /// Apply one process event to the attribution map and buffer it.
    fn record_process(&self, event: &ProcessEvent) {
        let attribution = self.state.attribution();
        match event {
            ProcessEvent::ProcessStart {
                container_id, pid, ..
            } => {
                attribution.process_started(container_id, *pid);
            }
            ProcessEvent::ProcessExit { container_id, pid } => {
                attribution.process_exited(container_id, *pid);
            }
        }
        if let Some(line) = encode(event) {
            self.pending.lock().push(line);
        }
    }

    fn record_network(&self, event: &NetworkEvent) {
        if let Some(line) = encode(event) {
            self.pending.lock().push(line);
        }
    }

    /// Write every buffered line to `sink`. Returns the number written.
    fn flush_pending(&self, sink: &LogSink) -> usize {
        let lines = std::mem::take(&mut *self.pending.lock());
        for line in &lines {
            if let Err(e) = sink.write_line(line) {
                warn!(error = %e, "Failed to write system log line");
            }
        }
        if let Err(e) = sink.flush() {
            warn!(error = %e, "Failed to flush system log");
        }
        lines.len()
    }
}

#[async_trait]
impl EventMonitor for SystemMonitor {
    fn initialize_probe(&self, base_dir: &Path) -> DaemonResult<()> {
        let destination = match &self.destination {
            LogDestination::File(path) if path.is_relative() => {
                LogDestination::File(base_dir.join(path))
            }
            other => other.clone(),
        };
        let sink = LogSink::open(destination)
            .map_err(|e| DaemonError::init(SubsystemKind::EventMonitor, e.to_string()))?;

        let mut probe = self.probe.lock();
        if probe.is_none() {
            let procfs = ProcfsProbe::new(&self.proc_root)
                .map_err(|e| DaemonError::init(SubsystemKind::EventMonitor, e.to_string()))?;
            *probe = Some(Box::new(procfs));
        }
        if let Some(probe) = probe.as_mut() {
            *self.network.lock() = probe.network_events();
        }
        drop(probe);

        *self.sink.lock() = Some(Arc::new(sink));
        info!(proc_root = %self.proc_root.display(), "Process probe attached");
        Ok(())
    }

    async fn trace_process_events(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        let probe = self.probe.lock().take();
        let Some(mut probe) = probe else {
            warn!("Process probe was not initialized");
            return;
        };
        ready.ready();

        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut observed = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Scans walk all of procfs; keep them off the async workers
            let scan = tokio::task::spawn_blocking(move || {
                let events = probe.poll_events();
                (probe, events)
            })
            .await;
            let events = match scan {
                Ok((returned, events)) => {
                    probe = returned;
                    events
                }
                Err(e) => {
                    error!(error = %e, "Process scan task failed, stopping process tracing");
                    return;
                }
            };
            match events {
                Ok(events) => {
                    for event in &events {
                        self.record_process(event);
                    }
                    observed += events.len() as u64;
                }
                Err(e) => warn!(error = %e, "Process scan failed"),
            }
        }

        *self.probe.lock() = Some(probe);
        debug!(observed, "Process tracing stopped");
    }

    async fn trace_network_events(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        let receiver = self.network.lock().take();
        ready.ready();
        let Some(mut receiver) = receiver else {
            debug!("Probe offers no network events");
            shutdown.cancelled().await;
            return;
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = receiver.recv() => event,
            };
            match event {
                Some(event) => self.record_network(&event),
                None => {
                    warn!("Network event stream closed");
                    break;
                }
            }
        }
    }

    async fn flush_system_logs(&self, shutdown: CancellationToken, mut ready: ReadySignal) {
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else {
            warn!("System log sink was not initialized");
            return;
        };
        ready.ready();

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush_pending(&sink);
                }
            }
        }

        let written = self.flush_pending(&sink);
        debug!(written, "Final system log flush");
    }

    fn destroy(&self) {
        if let Some(sink) = self.sink.lock().take() {
            self.flush_pending(&sink);
        }
        info!(persist = false, "Event monitor released");
    }
}
