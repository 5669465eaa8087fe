//! Error taxonomy for maintenance operations.

use thiserror::Error;

use crate::rpc::codes;

#[derive(Error, Debug)]
pub enum MaintError {
    /// A host token matched nothing in the topology snapshot
    #[error("Unknown host or node: {0}")]
    UnknownHost(String),

    #[error("Planning error: {0}")]
    Planning(String),

    /// Network failure or timeout; idempotent calls may retry
    #[error("CMS unavailable: {0}")]
    RpcTransient(String),

    /// Rejected by the CMS; never retried
    #[error("CMS rejected request ({code}): {message}")]
    RpcPermanent { code: i32, message: String },

    #[error("Restart of {node} failed: {reason}")]
    Restart { node: String, reason: String },

    #[error("Maintenance task not found: {0}")]
    TaskNotFound(String),

    #[error("Locks still pending after {polls} polls for task {task_uid}")]
    PendingTimeout { task_uid: String, polls: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MaintError {
    /// Map a JSON-RPC error returned by the CMS onto the taxonomy
    pub fn from_rpc(code: i32, message: String) -> Self {
        match code {
            codes::TASK_NOT_FOUND => MaintError::TaskNotFound(message),
            _ => MaintError::RpcPermanent { code, message },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, MaintError::RpcTransient(_) | MaintError::Io(_))
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            MaintError::UnknownHost(_) | MaintError::Planning(_) => 2,
            MaintError::RpcPermanent { .. } => 3,
            MaintError::TaskNotFound(_) => 4,
            MaintError::PendingTimeout { .. } => 5,
            MaintError::Restart { .. } => 6,
            MaintError::RpcTransient(_) => 70,
            MaintError::Io(_) | MaintError::Json(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rpc_task_not_found() {
        let err = MaintError::from_rpc(codes::TASK_NOT_FOUND, "maintenance-x".into());
        assert!(matches!(err, MaintError::TaskNotFound(_)));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_availability_rejection_is_permanent() {
        let err = MaintError::from_rpc(codes::AVAILABILITY_VIOLATED, "too many".into());
        assert!(matches!(err, MaintError::RpcPermanent { .. }));
        assert!(!err.is_transient());
    }
}
