// src/watchers/feed.rs
// Orchestration client backed by JSON-lines feeds in a local directory
//
// Layout of the feed directory:
//   runtime                   container runtime identity, e.g. "containerd://1.7.2"
//   containerd-events.jsonl   or docker-events.jsonl
//   pods.jsonl
//   policies.jsonl

use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::types::{Container, Pod, SecurityPolicy};
use crate::watchers::source::{BoxSource, JsonLinesSource};
use crate::watchers::{OrchestrationClient, RuntimeFlavor};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

pub const RUNTIME_FILE: &str = "runtime";
pub const PODS_FEED: &str = "pods.jsonl";
pub const POLICIES_FEED: &str = "policies.jsonl";

pub struct FeedOrchestrator {
    feed_dir: Option<PathBuf>,
    poll_interval: Duration,
}

impl FeedOrchestrator {
    pub fn new(feed_dir: Option<PathBuf>) -> Self {
        FeedOrchestrator {
            feed_dir,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn dir(&self) -> DaemonResult<&PathBuf> {
        self.feed_dir
            .as_ref()
            .ok_or_else(|| DaemonError::OrchestrationUnavailable {
                message: "no feed directory configured".to_string(),
            })
    }

    async fn open<T>(&self, name: &str, file: &str) -> DaemonResult<BoxSource<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = self.dir()?.join(file);
        let source = JsonLinesSource::<T, _>::open(name, &path)
            .await?
            .follow(self.poll_interval);
        Ok(Box::new(source))
    }
}

pub fn runtime_feed(flavor: RuntimeFlavor) -> &'static str {
    match flavor {
        RuntimeFlavor::Containerd => "containerd-events.jsonl",
        RuntimeFlavor::Docker => "docker-events.jsonl",
    }
}

#[async_trait]
impl OrchestrationClient for FeedOrchestrator {
    async fn try_connect(&self) -> DaemonResult<()> {
        let dir = self.dir()?;
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DaemonError::OrchestrationUnavailable {
                message: format!("{} is not a directory", dir.display()),
            }),
            Err(e) => Err(DaemonError::OrchestrationUnavailable {
                message: format!("{}: {}", dir.display(), e),
            }),
        }
    }

    async fn container_runtime(&self) -> DaemonResult<String> {
        let path = self.dir()?.join(RUNTIME_FILE);
        let identity = tokio::fs::read_to_string(&path).await?;
        Ok(identity.trim().to_string())
    }

    async fn runtime_events(&self, flavor: RuntimeFlavor) -> DaemonResult<BoxSource<Container>> {
        self.open(&format!("{}-events", flavor), runtime_feed(flavor))
            .await
    }

    async fn pod_events(&self) -> DaemonResult<BoxSource<Pod>> {
        self.open("pods", PODS_FEED).await
    }

    async fn policy_events(&self) -> DaemonResult<BoxSource<SecurityPolicy>> {
        self.open("policies", POLICIES_FEED).await
    }
}
