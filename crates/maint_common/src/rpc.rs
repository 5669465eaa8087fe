//! JSON-RPC 2.0 types for CMS communication.

use serde::{Deserialize, Serialize};

use crate::types::{
    ActionGroup, ActionGroupStates, ActionUid, CompleteResult, MaintenanceTask, Node,
    TaskOptions,
};

/// Error codes returned by the CMS
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const TASK_NOT_FOUND: i32 = -32010;
    pub const AVAILABILITY_VIOLATED: i32 = -32011;
    pub const DUPLICATE_TASK: i32 = -32012;
    pub const UNAUTHORIZED: i32 = -32013;
}

/// Methods served by the CMS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    Ping,
    WhoAmI,
    ListClusterNodes,
    CreateMaintenanceTask,
    ListMaintenanceTasks,
    GetMaintenanceTask,
    RefreshMaintenanceTask,
    CompleteAction,
}

impl RpcMethod {
    /// Safe to resend after a transport failure
    pub fn is_idempotent(self) -> bool {
        !matches!(self, RpcMethod::CreateMaintenanceTask | RpcMethod::CompleteAction)
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: RpcMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Caller identity established by the auth layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub id: String,
}

impl RpcRequest {
    pub fn new(method: RpcMethod, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
            user: None,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: String,
}

impl RpcResponse {
    pub fn success(id: String, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: String, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResult {
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNodesResult {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskParams {
    pub task_options: TaskOptions,
    pub action_groups: Vec<ActionGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResult {
    pub task_uid: String,
    pub action_group_states: Vec<ActionGroupStates>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksResult {
    pub task_uids: Vec<String>,
}

/// Parameters for get/refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUidParams {
    pub task_uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: MaintenanceTask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteActionParams {
    pub action_uids: Vec<ActionUid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteActionResult {
    pub action_statuses: Vec<CompleteResult>,
}
