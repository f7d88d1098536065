// src/utils/logger.rs
// tracing subscriber setup and timing helpers

use std::time::Instant;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "PODGUARD_LOG_FORMAT";
pub const LOG_FILTER_ENV: &str = "PODGUARD_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<LogFormat> {
        match value.to_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "console" => Some(LogFormat::Console),
            _ => None,
        }
    }

    pub fn from_env() -> LogFormat {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or(LogFormat::Console)
    }
}

pub struct Logger;

impl Logger {
    /// Install the global subscriber.
    ///
    /// Lines carrying `persist = false` are daemon-internal status output and
    /// must not be forwarded to the audit or system log destinations.
    pub fn init(format: LogFormat) {
        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);

        // A second init (tests) keeps the first subscriber
        let _ = match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Console => builder.try_init(),
        };
    }
}

/// Timing helper for measuring operation duration
pub struct Timer {
    start: Instant,
    event: &'static str,
}

impl Timer {
    pub fn new(event: &'static str) -> Self {
        Self {
            start: Instant::now(),
            event,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn log_completion(self) {
        tracing::info!(
            persist = false,
            duration_ms = self.elapsed_ms(),
            "Completed {}",
            self.event
        );
    }
}
