// src/daemon/error.rs
// Error taxonomy shared by the lifecycle, watcher and collaborator layers

use crate::daemon::subsystem::{SubsystemKind, SubsystemState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to initialize the {subsystem}: {message}")]
    InitializationFailed {
        subsystem: SubsystemKind,
        message: String,
    },

    #[error("Invalid lifecycle transition for the {subsystem}: {from} -> {to}")]
    InvalidTransition {
        subsystem: SubsystemKind,
        from: SubsystemState,
        to: SubsystemState,
    },

    #[error("Orchestration API unavailable: {message}")]
    OrchestrationUnavailable { message: String },

    #[error("Watch stream '{source_name}' failed: {message}")]
    WatchStream {
        source_name: String,
        message: String,
    },

    #[error("Invalid log destination '{option}': {message}")]
    InvalidLogDestination { option: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaemonError {
    pub fn init(subsystem: SubsystemKind, message: impl Into<String>) -> Self {
        DaemonError::InitializationFailed {
            subsystem,
            message: message.into(),
        }
    }

    pub fn stream(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonError::WatchStream {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_error_names_subsystem() {
        let err = DaemonError::init(SubsystemKind::AuditLogger, "no such file");
        assert_eq!(
            err.to_string(),
            "Failed to initialize the audit logger: no such file"
        );
    }

    #[test]
    fn test_transition_error_display() {
        let err = DaemonError::InvalidTransition {
            subsystem: SubsystemKind::Enforcer,
            from: SubsystemState::Closed,
            to: SubsystemState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid lifecycle transition for the runtime enforcer: closed -> running"
        );
    }
}
