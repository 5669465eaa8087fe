//! RPC request handlers.

use maint_common::rpc::{
    codes, ClusterNodesResult, CompleteActionParams, CompleteActionResult, CreateTaskParams,
    ListTasksParams, ListTasksResult, RpcMethod, RpcRequest, RpcResponse, TaskResult,
    TaskUidParams, WhoAmIResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::state::{Rejection, SharedState};

/// Identity reported for requests that carry no user
pub const ANONYMOUS_USER: &str = "anonymous";

/// Handle an RPC request
pub async fn handle_request(state: SharedState, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let user = request.user.clone();

    match request.method {
        RpcMethod::Ping => {
            let uptime_secs = state.read().await.uptime_secs();
            RpcResponse::success(
                id,
                serde_json::json!({ "status": "ok", "uptime_secs": uptime_secs }),
            )
        }
        RpcMethod::WhoAmI => reply(
            id,
            Ok(WhoAmIResult {
                user: user.unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            }),
        ),
        RpcMethod::ListClusterNodes => handle_list_nodes(state, id).await,
        RpcMethod::CreateMaintenanceTask => handle_create(state, id, user, request.params).await,
        RpcMethod::ListMaintenanceTasks => handle_list_tasks(state, id, request.params).await,
        RpcMethod::GetMaintenanceTask => handle_get(state, id, request.params).await,
        RpcMethod::RefreshMaintenanceTask => handle_refresh(state, id, request.params).await,
        RpcMethod::CompleteAction => handle_complete(state, id, user, request.params).await,
    }
}

fn parse_params<T: DeserializeOwned>(
    id: &str,
    params: Option<serde_json::Value>,
) -> Result<T, RpcResponse> {
    match params {
        Some(p) => serde_json::from_value(p).map_err(|e| {
            RpcResponse::error(
                id.to_string(),
                codes::INVALID_PARAMS,
                format!("Invalid params: {}", e),
            )
        }),
        None => Err(RpcResponse::error(
            id.to_string(),
            codes::INVALID_PARAMS,
            "Missing params".to_string(),
        )),
    }
}

fn reply<T: Serialize>(id: String, result: Result<T, Rejection>) -> RpcResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::error(id, codes::PARSE_ERROR, e.to_string()),
        },
        Err(rejection) => {
            warn!("Rejected request {}: {}", id, rejection);
            RpcResponse::error(id, rejection.code, rejection.message)
        }
    }
}

async fn handle_list_nodes(state: SharedState, id: String) -> RpcResponse {
    let state = state.read().await;
    let nodes = state.nodes().to_vec();
    reply(id, Ok(ClusterNodesResult { nodes }))
}

async fn handle_create(
    state: SharedState,
    id: String,
    user: Option<String>,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: CreateTaskParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    info!(
        "Processing create for task {}",
        params.task_options.task_uid
    );
    let mut state = state.write().await;
    reply(id, state.create_task(user, params))
}

async fn handle_list_tasks(
    state: SharedState,
    id: String,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: ListTasksParams = match params {
        Some(_) => match parse_params(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        },
        None => ListTasksParams { user: None },
    };

    let state = state.read().await;
    let task_uids = state.list_tasks(params.user.as_deref());
    reply(id, Ok(ListTasksResult { task_uids }))
}

async fn handle_get(
    state: SharedState,
    id: String,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: TaskUidParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let state = state.read().await;
    reply(
        id,
        state
            .get_task(&params.task_uid)
            .map(|task| TaskResult { task }),
    )
}

async fn handle_refresh(
    state: SharedState,
    id: String,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: TaskUidParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let mut state = state.write().await;
    reply(
        id,
        state
            .refresh_task(&params.task_uid)
            .map(|task| TaskResult { task }),
    )
}

async fn handle_complete(
    state: SharedState,
    id: String,
    user: Option<String>,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: CompleteActionParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    info!("Completing {} actions", params.action_uids.len());
    let mut state = state.write().await;
    reply(
        id,
        state
            .complete_actions(user.as_deref(), &params.action_uids)
            .map(|action_statuses| CompleteActionResult { action_statuses }),
    )
}
