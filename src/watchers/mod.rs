// src/watchers/mod.rs
// Orchestration-driven watchers that keep the state store in sync

pub mod feed;
pub mod handlers;
pub mod source;

use crate::daemon::context::DaemonContext;
use crate::daemon::error::DaemonResult;
use crate::daemon::state::DaemonState;
use crate::daemon::types::{Container, Pod, SecurityPolicy, WatchEvent};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use feed::FeedOrchestrator;
pub use source::{BoxSource, ChannelSource, EventSource, JsonLinesSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFlavor {
    Containerd,
    Docker,
}

impl RuntimeFlavor {
    /// Substring match on the detected runtime identity, containerd first.
    pub fn detect(identity: &str) -> Option<RuntimeFlavor> {
        if identity.contains("containerd") {
            Some(RuntimeFlavor::Containerd)
        } else if identity.contains("docker") {
            Some(RuntimeFlavor::Docker)
        } else {
            None
        }
    }
}

impl fmt::Display for RuntimeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFlavor::Containerd => f.write_str("containerd"),
            RuntimeFlavor::Docker => f.write_str("docker"),
        }
    }
}

/// Client for the orchestration API. Wire protocol is the implementor's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    async fn try_connect(&self) -> DaemonResult<()>;

    /// Runtime identity reported for this node, e.g. `containerd://1.7.2`
    async fn container_runtime(&self) -> DaemonResult<String>;

    async fn runtime_events(&self, flavor: RuntimeFlavor) -> DaemonResult<BoxSource<Container>>;

    async fn pod_events(&self) -> DaemonResult<BoxSource<Pod>>;

    async fn policy_events(&self) -> DaemonResult<BoxSource<SecurityPolicy>>;
}

/// What the watcher set ended up running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherLaunch {
    /// Orchestration API unreachable; only locally observed activity is used
    Degraded,
    Started {
        runtime: Option<RuntimeFlavor>,
        watchers: Vec<&'static str>,
    },
}

const ERROR_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Pull events until the source ends or `shutdown` fires, applying each one
/// to the store in the order received.
pub async fn run_watcher<T, F>(
    mut source: BoxSource<T>,
    shutdown: CancellationToken,
    state: Arc<DaemonState>,
    apply: F,
) -> u64
where
    T: Send,
    F: Fn(&DaemonState, WatchEvent<T>) + Send,
{
    let mut applied = 0u64;
    let mut backoff = ERROR_BACKOFF_MIN;
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = source.next_event() => next,
        };
        match next {
            Some(Ok(event)) => {
                apply(&state, event);
                applied += 1;
                backoff = ERROR_BACKOFF_MIN;
            }
            Some(Err(e)) => {
                warn!(
                    source = source.name(),
                    error = %e,
                    retry_in = ?backoff,
                    "Watch stream error, skipping event"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(ERROR_BACKOFF_MAX);
            }
            None => {
                warn!(source = source.name(), "Watch stream closed");
                break;
            }
        }
    }
    info!(persist = false, source = source.name(), applied, "Watcher stopped");
    applied
}

pub struct EventWatcherSet {
    ctx: DaemonContext,
    client: Arc<dyn OrchestrationClient>,
}

impl EventWatcherSet {
    pub fn new(ctx: DaemonContext, client: Arc<dyn OrchestrationClient>) -> Self {
        EventWatcherSet { ctx, client }
    }

    /// Connect, pick the runtime watcher, and spawn the runtime, pod and
    /// policy watchers through the task tracker. Nothing here is fatal.
    pub async fn launch(&self) -> WatcherLaunch {
        if let Err(e) = self.client.try_connect().await {
            warn!(error = %e, "Orchestration API unreachable, running with local container events only");
            return WatcherLaunch::Degraded;
        }

        let identity = match self.client.container_runtime().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Failed to detect the container runtime");
                String::new()
            }
        };
        info!("Container Runtime: {}", identity);

        let mut watchers = Vec::new();
        let runtime = RuntimeFlavor::detect(&identity);
        match runtime {
            Some(flavor) => match self.client.runtime_events(flavor).await {
                Ok(source) => {
                    let name = match flavor {
                        RuntimeFlavor::Containerd => "containerd-event-watcher",
                        RuntimeFlavor::Docker => "docker-event-watcher",
                    };
                    self.spawn_watcher(name, source, move |state, event| {
                        handlers::apply_container_event(state, flavor, event)
                    });
                    watchers.push(name);
                }
                Err(e) => warn!(runtime = %flavor, error = %e, "Failed to watch runtime events"),
            },
            None => warn!(
                identity = %identity,
                "Unsupported container runtime, no runtime event watcher started"
            ),
        }

        match self.client.pod_events().await {
            Ok(source) => {
                self.spawn_watcher("pod-watcher", source, handlers::apply_pod_event);
                watchers.push("pod-watcher");
            }
            Err(e) => warn!(error = %e, "Failed to watch pods"),
        }

        match self.client.policy_events().await {
            Ok(source) => {
                self.spawn_watcher("policy-watcher", source, handlers::apply_policy_event);
                watchers.push("policy-watcher");
            }
            Err(e) => warn!(error = %e, "Failed to watch security policies"),
        }

        WatcherLaunch::Started { runtime, watchers }
    }

    fn spawn_watcher<T, F>(&self, name: &'static str, source: BoxSource<T>, apply: F)
    where
        T: Send + 'static,
        F: Fn(&DaemonState, WatchEvent<T>) + Send + 'static,
    {
        let shutdown = self.ctx.shutdown_token();
        let state = Arc::clone(self.ctx.state());
        self.ctx.spawn(name, async move {
            run_watcher(source, shutdown, state, apply).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::error::DaemonError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pod_source(events: Vec<WatchEvent<Pod>>) -> BoxSource<Pod> {
        let (tx, source) = ChannelSource::channel("pods", events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        // Keep the sender alive so the stream stays open until cancellation
        std::mem::forget(tx);
        Box::new(source)
    }

    fn empty_policy_source() -> BoxSource<SecurityPolicy> {
        let (tx, source) = ChannelSource::channel("policies", 1);
        std::mem::forget(tx);
        Box::new(source)
    }

    fn empty_container_source() -> BoxSource<Container> {
        let (tx, source) = ChannelSource::channel("containers", 1);
        std::mem::forget(tx);
        Box::new(source)
    }

    #[test]
    fn test_runtime_detection() {
        assert_eq!(
            RuntimeFlavor::detect("containerd://1.7.2"),
            Some(RuntimeFlavor::Containerd)
        );
        assert_eq!(RuntimeFlavor::detect("docker://24.0.5"), Some(RuntimeFlavor::Docker));
        assert_eq!(RuntimeFlavor::detect("cri-o://1.28.0"), None);
        assert_eq!(RuntimeFlavor::detect(""), None);
    }

    #[tokio::test]
    async fn test_unreachable_api_launches_nothing() {
        let mut client = MockOrchestrationClient::new();
        client.expect_try_connect().times(1).returning(|| {
            Err(DaemonError::OrchestrationUnavailable {
                message: "no service account".to_string(),
            })
        });
        client.expect_container_runtime().times(0);
        client.expect_runtime_events().times(0);
        client.expect_pod_events().times(0);
        client.expect_policy_events().times(0);

        let ctx = DaemonContext::new("/tmp");
        let set = EventWatcherSet::new(ctx.clone(), Arc::new(client));
        assert_eq!(set.launch().await, WatcherLaunch::Degraded);
        assert!(ctx.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_docker_identity_starts_only_docker_watcher() {
        let mut client = MockOrchestrationClient::new();
        client.expect_try_connect().returning(|| Ok(()));
        client
            .expect_container_runtime()
            .returning(|| Ok("docker://24.0.5".to_string()));
        client
            .expect_runtime_events()
            .withf(|flavor| *flavor == RuntimeFlavor::Docker)
            .times(1)
            .returning(|_| Ok(empty_container_source()));
        client.expect_pod_events().returning(|| Ok(pod_source(vec![])));
        client
            .expect_policy_events()
            .returning(|| Ok(empty_policy_source()));

        let ctx = DaemonContext::new("/tmp");
        let set = EventWatcherSet::new(ctx.clone(), Arc::new(client));
        let launch = set.launch().await;
        assert_eq!(
            launch,
            WatcherLaunch::Started {
                runtime: Some(RuntimeFlavor::Docker),
                watchers: vec!["docker-event-watcher", "pod-watcher", "policy-watcher"],
            }
        );
        assert_eq!(ctx.tracker().len(), 3);

        ctx.shutdown_token().cancel();
        ctx.tracker().close();
        tokio::time::timeout(Duration::from_secs(1), ctx.tracker().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_runtime_still_watches_pods_and_policies() {
        let mut client = MockOrchestrationClient::new();
        client.expect_try_connect().returning(|| Ok(()));
        client
            .expect_container_runtime()
            .returning(|| Ok("cri-o://1.28.0".to_string()));
        client.expect_runtime_events().times(0);
        client.expect_pod_events().returning(|| {
            Ok(pod_source(vec![WatchEvent::Added(Pod {
                uid: "u1".to_string(),
                namespace: "default".to_string(),
                name: "web-0".to_string(),
                containers: vec!["cri-o://c1".to_string()],
                labels: Default::default(),
            })]))
        });
        client
            .expect_policy_events()
            .returning(|| Ok(empty_policy_source()));

        let ctx = DaemonContext::new("/tmp");
        let set = EventWatcherSet::new(ctx.clone(), Arc::new(client));
        let launch = set.launch().await;
        assert_eq!(
            launch,
            WatcherLaunch::Started {
                runtime: None,
                watchers: vec!["pod-watcher", "policy-watcher"],
            }
        );

        let state = Arc::clone(ctx.state());
        tokio::time::timeout(Duration::from_secs(1), async move {
            while state.pod("u1").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        ctx.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_run_watcher_stops_on_cancellation() {
        let state = Arc::new(DaemonState::new());
        let shutdown = CancellationToken::new();
        let (tx, source) = ChannelSource::<Pod>::channel("pods", 4);

        let handle = tokio::spawn(run_watcher(
            Box::new(source),
            shutdown.clone(),
            Arc::clone(&state),
            handlers::apply_pod_event,
        ));
        tx.send(WatchEvent::Added(Pod {
            uid: "u1".to_string(),
            namespace: "ns".to_string(),
            name: "a".to_string(),
            containers: vec![],
            labels: Default::default(),
        }))
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        let applied = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied, 1);
        assert!(state.pod("u1").is_some());
        drop(tx);
    }

    /// Source whose every read fails
    struct BrokenSource(Arc<AtomicUsize>);

    #[async_trait]
    impl EventSource<Pod> for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn next_event(&mut self) -> Option<DaemonResult<WatchEvent<Pod>>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(Err(DaemonError::stream("broken", "read failed")))
        }
    }

    #[tokio::test]
    async fn test_repeated_stream_errors_back_off() {
        let reads = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_watcher(
            Box::new(BrokenSource(Arc::clone(&reads))),
            shutdown.clone(),
            Arc::new(DaemonState::new()),
            handlers::apply_pod_event,
        ));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();
        let applied = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied, 0);
        // 100ms then 200ms waits leave room for about three reads
        let reads = reads.load(Ordering::SeqCst);
        assert!((1..=4).contains(&reads), "{} reads", reads);
    }
}
