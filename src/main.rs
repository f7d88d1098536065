use anyhow::Context;
use clap::Parser;
use podguard::daemon::{Daemon, DaemonConfig, DrainOutcome};
use podguard::utils::logger::{LogFormat, Logger};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(long, env = "PODGUARD_BASE_DIR", help = "Base directory for relative log paths (defaults to the executable's directory)")]
    base_dir: Option<PathBuf>,
    #[clap(long, env = "PODGUARD_AUDIT_LOG", default_value = "none", help = "Audit log destination: stdout, none, or a file path")]
    audit_log: String,
    #[clap(long, env = "PODGUARD_SYSTEM_LOG", default_value = "none", help = "System log destination: stdout, none, or a file path")]
    system_log: String,
    #[clap(long, env = "PODGUARD_FEED_DIR", help = "Orchestration feed directory; without it the daemon runs degraded")]
    feed_dir: Option<PathBuf>,
    #[clap(long, env = "PODGUARD_AUDIT_SOURCE", default_value = podguard::audit::DEFAULT_AUDIT_SOURCE)]
    audit_source: PathBuf,
    #[clap(long, env = "PODGUARD_PROC_ROOT", default_value = podguard::monitor::DEFAULT_PROC_ROOT)]
    proc_root: PathBuf,
    #[clap(long, env = "PODGUARD_LSM_PATH", default_value = podguard::enforcer::DEFAULT_LSM_PATH)]
    lsm_path: PathBuf,
    #[clap(long, env = "PODGUARD_READINESS_TIMEOUT", default_value = "1s", value_parser = humantime::parse_duration)]
    readiness_timeout: Duration,
    #[clap(long, env = "PODGUARD_DRAIN_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    drain_timeout: Duration,
    #[clap(long, env = "PODGUARD_FLUSH_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    flush_interval: Duration,
    #[clap(long, env = "PODGUARD_SCAN_INTERVAL", default_value = "500ms", value_parser = humantime::parse_duration)]
    scan_interval: Duration,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let base_dir = match self.base_dir {
            Some(dir) => dir,
            None => executable_dir()?,
        };
        Ok(DaemonConfig {
            base_dir,
            audit_log: self.audit_log,
            system_log: self.system_log,
            feed_dir: self.feed_dir,
            audit_source: self.audit_source,
            proc_root: self.proc_root,
            lsm_path: self.lsm_path,
            readiness_timeout: self.readiness_timeout,
            drain_timeout: self.drain_timeout,
            flush_interval: self.flush_interval,
            scan_interval: self.scan_interval,
        })
    }
}

fn executable_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    exe.parent()
        .map(|dir| dir.to_path_buf())
        .context("Executable has no parent directory")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Logger::init(LogFormat::from_env());

    let config = Cli::parse().into_config()?;
    let daemon = Daemon::new(config).context("Invalid daemon configuration")?;

    match daemon.run().await {
        Ok(report) => {
            if let DrainOutcome::TimedOut { remaining } = report.drain {
                warn!(remaining, "Exiting with tasks still running");
            }
            info!(signal = report.signal, "podguard exited");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "podguard failed to start");
            Err(e).context("Startup failed")
        }
    }
}
