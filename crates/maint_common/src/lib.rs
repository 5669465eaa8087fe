//! Shared types for the maintenance tooling.
//!
//! Wire model for the Cluster Management Service (CMS) protocol, the error
//! taxonomy used by both the CLI and the reference daemon, and constants.

pub mod error;
pub mod rpc;
pub mod types;

pub use error::MaintError;
pub use rpc::{RpcError, RpcMethod, RpcRequest, RpcResponse};
pub use types::{
    ActionGroup, ActionGroupStates, ActionReason, ActionState, ActionStatus, ActionUid,
    AvailabilityMode, CompleteResult, CompleteStatus, LockAction, LockScope, MaintenanceTask,
    Node, NodeId, TaskOptions,
};

/// Crate version, shared by both binaries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default socket path of the CMS daemon
pub const SOCKET_PATH: &str = "/run/cmsd/cms.sock";

/// Every task uid generated by the CLI starts with this prefix
pub const TASK_UUID_PREFIX: &str = "maintenance-";

/// Description attached to tasks created by a rolling restart
pub const RESTART_TASK_DESCRIPTION: &str = "Rolling restart maintenance task";

/// Generate a fresh task uid
pub fn new_task_uid() -> String {
    format!("{}{}", TASK_UUID_PREFIX, uuid::Uuid::new_v4())
}
