//! maintctl library - exposes modules for the binary and integration tests
//!
//! Resolves hosts against the CMS topology, plans maintenance tasks, and
//! drives rolling restarts lock by lock.

pub mod cli;
pub mod commands;
pub mod config;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod output;
pub mod planner;
pub mod resolver;
pub mod restarter;
pub mod rpc_client;
pub mod tracker;

pub use config::MaintConfig;
pub use driver::{
    AbortCause, DriverEvent, DriverOptions, DriverState, RollingRestartDriver, RunSummary,
};
pub use restarter::{CommandRestarter, FakeRestarter, RestartError, Restarter};
pub use rpc_client::{CmsClient, SocketCmsClient};
