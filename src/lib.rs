//! podguard: node-resident security daemon core.
//!
//! Keeps a shared state store of containers, pods, policies and process
//! attribution in sync with the container runtime and the orchestration API,
//! runs the enforcer, audit logger and event monitor, and drains every
//! background task on termination.

pub mod audit;
pub mod daemon;
pub mod enforcer;
pub mod host;
pub mod monitor;
pub mod utils;
pub mod watchers;

pub use daemon::{Daemon, DaemonConfig, DaemonError, DaemonReport, DaemonResult};
