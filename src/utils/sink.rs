// src/utils/sink.rs
// Destinations for audit and system log records

use crate::daemon::error::{DaemonError, DaemonResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Parsed form of an `--audit-log` / `--system-log` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    None,
    File(PathBuf),
}

impl LogDestination {
    pub fn parse(option: &str) -> DaemonResult<LogDestination> {
        let option = option.trim();
        match option {
            "stdout" => Ok(LogDestination::Stdout),
            "none" | "" => Ok(LogDestination::None),
            other => {
                let path = other.strip_prefix("file:").unwrap_or(other);
                if path.is_empty() {
                    return Err(DaemonError::InvalidLogDestination {
                        option: option.to_string(),
                        message: "empty file path".to_string(),
                    });
                }
                Ok(LogDestination::File(PathBuf::from(path)))
            }
        }
    }
}

enum Writer {
    Stdout,
    None,
    File(BufWriter<File>),
}

/// Line-oriented sink. Each write takes the sink lock for one line.
/// File output is buffered until `flush`.
pub struct LogSink {
    destination: LogDestination,
    writer: Mutex<Writer>,
}

impl LogSink {
    pub fn open(destination: LogDestination) -> DaemonResult<LogSink> {
        let writer = match &destination {
            LogDestination::Stdout => Writer::Stdout,
            LogDestination::None => Writer::None,
            LogDestination::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| DaemonError::InvalidLogDestination {
                        option: path.display().to_string(),
                        message: e.to_string(),
                    })?;
                Writer::File(BufWriter::new(file))
            }
        };
        Ok(LogSink {
            destination,
            writer: Mutex::new(writer),
        })
    }

    pub fn destination(&self) -> &LogDestination {
        &self.destination
    }

    pub fn is_enabled(&self) -> bool {
        self.destination != LogDestination::None
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock();
        match &mut *writer {
            Writer::Stdout => writeln!(io::stdout(), "{}", line),
            Writer::None => Ok(()),
            Writer::File(file) => writeln!(file, "{}", line),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        let mut writer = self.writer.lock();
        match &mut *writer {
            Writer::Stdout => io::stdout().flush(),
            Writer::None => Ok(()),
            Writer::File(file) => file.flush(),
        }
    }
}
