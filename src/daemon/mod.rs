// Daemon modules
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod shutdown;
pub mod state;
pub mod subsystem;
pub mod types;

// Re-export commonly used types
pub use config::DaemonConfig;
pub use context::DaemonContext;
pub use error::{DaemonError, DaemonResult};
pub use lifecycle::{LifecycleManager, Readiness, SubsystemOptions};
pub use shutdown::{DrainOutcome, ShutdownCoordinator, TerminationSignals};
pub use state::DaemonState;

use crate::host::HostSubsystems;
use crate::utils::logger::Timer;
use crate::watchers::{EventWatcherSet, FeedOrchestrator, OrchestrationClient, WatcherLaunch};
use std::future::Future;
use std::sync::Arc;
use subsystem::SubsystemFactory;
use tracing::{error, info};

/// What a completed run went through, from startup to drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonReport {
    pub readiness: Readiness,
    pub watchers: WatcherLaunch,
    pub signal: &'static str,
    pub drain: DrainOutcome,
}

pub struct Daemon {
    config: DaemonConfig,
    ctx: DaemonContext,
    factory: Arc<dyn SubsystemFactory>,
    client: Arc<dyn OrchestrationClient>,
}

impl Daemon {
    /// Daemon backed by the host collaborators and the feed orchestrator.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let factory = Arc::new(HostSubsystems::new(&config));
        let client = Arc::new(FeedOrchestrator::new(config.feed_dir.clone()));
        Daemon::with_collaborators(config, factory, client)
    }

    pub fn with_collaborators(
        config: DaemonConfig,
        factory: Arc<dyn SubsystemFactory>,
        client: Arc<dyn OrchestrationClient>,
    ) -> DaemonResult<Self> {
        config.validate()?;
        let ctx = DaemonContext::new(config.base_dir.clone());
        Ok(Daemon {
            config,
            ctx,
            factory,
            client,
        })
    }

    pub fn context(&self) -> &DaemonContext {
        &self.ctx
    }

    /// Run until a termination signal arrives, then drain.
    ///
    /// The handlers are installed before any subsystem starts, so a signal
    /// delivered during startup is held and acted on once startup completes.
    pub async fn run(self) -> DaemonResult<DaemonReport> {
        let mut signals = TerminationSignals::register()?;
        self.run_until(async move { signals.recv().await }).await
    }

    /// Start every subsystem and watcher, wait for `termination` to resolve
    /// to a signal name, then drain. Startup failures are returned after any
    /// already-running subsystems have been closed.
    pub async fn run_until<F>(self, termination: F) -> DaemonResult<DaemonReport>
    where
        F: Future<Output = &'static str>,
    {
        let timer = Timer::new("daemon startup");
        info!(base_dir = %self.config.base_dir.display(), "Starting podguard");

        let mut lifecycle = LifecycleManager::new(
            self.ctx.clone(),
            Arc::clone(&self.factory),
            self.config.subsystem_options(),
        );
        let coordinator = ShutdownCoordinator::new(self.ctx.clone(), self.config.drain_timeout);

        lifecycle.initialize()?;
        let readiness = match lifecycle.launch().await {
            Ok(readiness) => readiness,
            Err(e) => {
                error!(error = %e, "Failed to launch subsystem loops");
                coordinator.drain(&mut lifecycle).await;
                return Err(e);
            }
        };

        let watchers = EventWatcherSet::new(self.ctx.clone(), Arc::clone(&self.client))
            .launch()
            .await;
        let counts = self.ctx.state().counts();
        info!(
            tracked_tasks = self.ctx.tracker().len(),
            containers = counts.containers,
            pods = counts.pods,
            policies = counts.policies,
            "Initialized podguard"
        );
        timer.log_completion();

        let signal = termination.await;
        info!(signal, "Got a termination signal, shutting down");

        let drain = coordinator.drain(&mut lifecycle).await;
        info!(persist = false, "Terminated podguard");
        Ok(DaemonReport {
            readiness,
            watchers,
            signal,
            drain,
        })
    }
}
