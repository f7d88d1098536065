// src/watchers/source.rs
// Event sources feeding the watchers

use crate::daemon::error::{DaemonError, DaemonResult};
use crate::daemon::types::WatchEvent;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Ordered stream of add/update/delete events.
///
/// The watcher drops a pending `next_event` future only once the cancellation
/// token has fired, so partially read input may be lost at shutdown.
/// `None` means the stream has ended.
#[async_trait]
pub trait EventSource<T>: Send {
    fn name(&self) -> &str;

    async fn next_event(&mut self) -> Option<DaemonResult<WatchEvent<T>>>;
}

pub type BoxSource<T> = Box<dyn EventSource<T>>;

/// In-process source backed by a bounded channel
pub struct ChannelSource<T> {
    name: String,
    rx: mpsc::Receiver<WatchEvent<T>>,
}

impl<T> ChannelSource<T> {
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<WatchEvent<T>>) -> Self {
        ChannelSource {
            name: name.into(),
            rx,
        }
    }

    pub fn channel(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<WatchEvent<T>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChannelSource::new(name, rx))
    }
}

#[async_trait]
impl<T: Send> EventSource<T> for ChannelSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_event(&mut self) -> Option<DaemonResult<WatchEvent<T>>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Newline-delimited JSON watch events, one `{"type": .., "object": ..}` per line.
///
/// In follow mode the reader polls past end of input like `tail -f` and keeps
/// any unterminated trailing line until the rest of it arrives.
pub struct JsonLinesSource<T, R> {
    name: String,
    reader: BufReader<R>,
    pending: String,
    follow: Option<Duration>,
    _event: PhantomData<fn() -> T>,
}

impl<T, R: AsyncRead + Unpin> JsonLinesSource<T, R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        JsonLinesSource {
            name: name.into(),
            reader: BufReader::new(reader),
            pending: String::new(),
            follow: None,
            _event: PhantomData,
        }
    }

    pub fn follow(mut self, poll_interval: Duration) -> Self {
        self.follow = Some(poll_interval);
        self
    }
}

impl<T> JsonLinesSource<T, tokio::fs::File> {
    pub async fn open(name: impl Into<String>, path: &Path) -> DaemonResult<Self> {
        let name = name.into();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            DaemonError::stream(name.clone(), format!("{}: {}", path.display(), e))
        })?;
        Ok(JsonLinesSource::new(name, file))
    }
}

#[async_trait]
impl<T, R> EventSource<T> for JsonLinesSource<T, R>
where
    T: DeserializeOwned + Send,
    R: AsyncRead + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_event(&mut self) -> Option<DaemonResult<WatchEvent<T>>> {
        loop {
            let read = match self.reader.read_line(&mut self.pending).await {
                Ok(n) => n,
                Err(e) => return Some(Err(DaemonError::Io(e))),
            };

            if read == 0 || !self.pending.ends_with('\n') {
                match self.follow {
                    Some(poll) => {
                        tokio::time::sleep(poll).await;
                        continue;
                    }
                    None if self.pending.trim().is_empty() => return None,
                    // Final unterminated line at end of input
                    None => {}
                }
            }

            let line = std::mem::take(&mut self.pending);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(line)
                    .map_err(|e| DaemonError::stream(self.name.clone(), e.to_string())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::types::Pod;

    #[tokio::test]
    async fn test_json_lines_in_order_and_skip_blank() {
        let input = concat!(
            r#"{"type":"ADDED","object":{"uid":"u1","namespace":"default","name":"a"}}"#,
            "\n\n",
            r#"{"type":"DELETED","object":{"uid":"u1","namespace":"default","name":"a"}}"#,
        );
        let mut source: JsonLinesSource<Pod, _> = JsonLinesSource::new("pods", input.as_bytes());

        assert!(matches!(source.next_event().await, Some(Ok(WatchEvent::Added(_)))));
        assert!(matches!(source.next_event().await, Some(Ok(WatchEvent::Deleted(_)))));
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_reported_not_fatal() {
        let input = concat!(
            "not json\n",
            r#"{"type":"MODIFIED","object":{"uid":"u2","namespace":"ns","name":"b"}}"#,
            "\n"
        );
        let mut source: JsonLinesSource<Pod, _> = JsonLinesSource::new("pods", input.as_bytes());

        let err = source.next_event().await.unwrap().unwrap_err();
        assert!(matches!(err, DaemonError::WatchStream { .. }));
        assert!(matches!(source.next_event().await, Some(Ok(WatchEvent::Modified(_)))));
    }

    #[tokio::test]
    async fn test_follow_mode_waits_for_complete_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pods.jsonl");
        std::fs::write(&path, r#"{"type":"ADDED","object":{"uid":"u3","#).unwrap();

        let mut source: JsonLinesSource<Pod, _> = JsonLinesSource::open("pods", &path)
            .await
            .unwrap()
            .follow(Duration::from_millis(10));

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(writer_path)
                .unwrap();
            writeln!(file, r#""namespace":"ns","name":"c"}}}}"#).unwrap();
        });

        let event = tokio::time::timeout(Duration::from_secs(2), source.next_event())
            .await
            .unwrap();
        match event {
            Some(Ok(WatchEvent::Added(pod))) => assert_eq!(pod.uid, "u3"),
            other => panic!("unexpected event {:?}", other.map(|r| r.is_ok())),
        }
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_senders_drop() {
        let (tx, mut source) = ChannelSource::<Pod>::channel("pods", 4);
        tx.send(WatchEvent::Deleted(Pod {
            uid: "u4".to_string(),
            namespace: "ns".to_string(),
            name: "d".to_string(),
            containers: vec![],
            labels: Default::default(),
        }))
        .await
        .unwrap();
        drop(tx);
        assert!(source.next_event().await.unwrap().is_ok());
        assert!(source.next_event().await.is_none());
    }
}
