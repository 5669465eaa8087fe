//! Reference Cluster Management Service - exposes modules for testing.

pub mod config;
pub mod rpc_handler;
pub mod rpc_server;
pub mod state;

pub use config::CmsdConfig;
pub use state::{create_shared_state, CmsState, SharedState};
