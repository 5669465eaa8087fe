//! RPC Client - CMS task client over a Unix socket
//!
//! `CmsClient` is the seam the driver is written against; `SocketCmsClient`
//! speaks line-delimited JSON-RPC to cmsd. Every call gets its own
//! connection and a timeout. Idempotent calls are retried with exponential
//! backoff on transient failures; task creation and action completion are
//! sent exactly once.

use async_trait::async_trait;
use maint_common::rpc::{
    ClusterNodesResult, CompleteActionParams, CompleteActionResult, CreateTaskParams,
    CreateTaskResult, ListTasksParams, ListTasksResult, RpcMethod, RpcRequest, RpcResponse,
    TaskResult, TaskUidParams, WhoAmIResult,
};
use maint_common::{
    ActionGroup, ActionUid, CompleteResult, MaintError, MaintenanceTask, Node, TaskOptions,
};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::config::MaintConfig;

/// Operations the maintenance driver needs from the CMS
#[async_trait]
pub trait CmsClient: Send + Sync {
    /// Identity the CMS sees for this client
    async fn who_am_i(&self) -> Result<String, MaintError>;

    /// Topology snapshot used for host resolution
    async fn list_cluster_nodes(&self) -> Result<Vec<Node>, MaintError>;

    /// Not idempotent: call at most once per plan
    async fn create_task(
        &self,
        options: TaskOptions,
        groups: Vec<ActionGroup>,
    ) -> Result<CreateTaskResult, MaintError>;

    async fn list_tasks(&self, user: Option<String>) -> Result<Vec<String>, MaintError>;

    async fn get_task(&self, task_uid: &str) -> Result<MaintenanceTask, MaintError>;

    /// Ask the CMS to re-evaluate pending locks
    async fn refresh_task(&self, task_uid: &str) -> Result<MaintenanceTask, MaintError>;

    /// Only for actions observed PERFORMED
    async fn complete_actions(
        &self,
        action_uids: Vec<ActionUid>,
    ) -> Result<Vec<CompleteResult>, MaintError>;
}

/// Client for the CMS daemon socket
#[derive(Debug, Clone)]
pub struct SocketCmsClient {
    socket_path: PathBuf,
    user: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

impl SocketCmsClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            user: None,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn from_config(config: &MaintConfig, socket: Option<&str>) -> Self {
        Self {
            socket_path: PathBuf::from(config.socket_path(socket)),
            user: config.cms.user.clone(),
            timeout: Duration::from_secs(config.cms.rpc_timeout_secs),
            max_retries: config.cms.max_retries,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Send a request; retried only when the method is idempotent
    async fn call(
        &self,
        method: RpcMethod,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, MaintError> {
        if !method.is_idempotent() {
            return self.call_once(method, params).await;
        }

        let mut retry_delay = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{:?} failed ({}), retry {}/{} in {:?}",
                        method, e, attempt, self.max_retries, retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(Duration::from_millis(800));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(
        &self,
        method: RpcMethod,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, MaintError> {
        let request = RpcRequest::new(method, params).with_user(self.user.clone());
        match tokio::time::timeout(self.timeout, self.call_inner(&request)).await {
            Ok(result) => result,
            Err(_) => Err(MaintError::RpcTransient(format!(
                "{:?} timed out after {:?}",
                method, self.timeout
            ))),
        }
    }

    /// Inner call implementation (without timeout wrapper)
    async fn call_inner(&self, request: &RpcRequest) -> Result<serde_json::Value, MaintError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            MaintError::RpcTransient(format!(
                "cannot connect to CMS at {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        let (reader, mut writer) = stream.into_split();

        debug!("-> {:?} ({})", request.method, request.id);
        let request_json = serde_json::to_string(request)? + "\n";
        writer
            .write_all(request_json.as_bytes())
            .await
            .map_err(|e| MaintError::RpcTransient(format!("failed to send request: {}", e)))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| MaintError::RpcTransient(format!("failed to read response: {}", e)))?;
        if read == 0 {
            return Err(MaintError::RpcTransient(
                "CMS closed the connection".to_string(),
            ));
        }

        let response: RpcResponse = serde_json::from_str(&line)?;
        if response.id != request.id {
            return Err(MaintError::RpcPermanent {
                code: maint_common::rpc::codes::PARSE_ERROR,
                message: "response id mismatch".to_string(),
            });
        }

        if let Some(error) = response.error {
            return Err(MaintError::from_rpc(error.code, error.message));
        }

        response.result.ok_or_else(|| MaintError::RpcPermanent {
            code: maint_common::rpc::codes::PARSE_ERROR,
            message: "no result in response".to_string(),
        })
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: Option<serde_json::Value>,
    ) -> Result<T, MaintError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl CmsClient for SocketCmsClient {
    async fn who_am_i(&self) -> Result<String, MaintError> {
        let result: WhoAmIResult = self.call_typed(RpcMethod::WhoAmI, None).await?;
        Ok(result.user)
    }

    async fn list_cluster_nodes(&self) -> Result<Vec<Node>, MaintError> {
        let result: ClusterNodesResult = self.call_typed(RpcMethod::ListClusterNodes, None).await?;
        Ok(result.nodes)
    }

    async fn create_task(
        &self,
        options: TaskOptions,
        groups: Vec<ActionGroup>,
    ) -> Result<CreateTaskResult, MaintError> {
        let params = serde_json::to_value(CreateTaskParams {
            task_options: options,
            action_groups: groups,
        })?;
        self.call_typed(RpcMethod::CreateMaintenanceTask, Some(params))
            .await
    }

    async fn list_tasks(&self, user: Option<String>) -> Result<Vec<String>, MaintError> {
        let params = serde_json::to_value(ListTasksParams { user })?;
        let result: ListTasksResult = self
            .call_typed(RpcMethod::ListMaintenanceTasks, Some(params))
            .await?;
        Ok(result.task_uids)
    }

    async fn get_task(&self, task_uid: &str) -> Result<MaintenanceTask, MaintError> {
        let params = serde_json::to_value(TaskUidParams {
            task_uid: task_uid.to_string(),
        })?;
        let result: TaskResult = self
            .call_typed(RpcMethod::GetMaintenanceTask, Some(params))
            .await?;
        Ok(result.task)
    }

    async fn refresh_task(&self, task_uid: &str) -> Result<MaintenanceTask, MaintError> {
        let params = serde_json::to_value(TaskUidParams {
            task_uid: task_uid.to_string(),
        })?;
        let result: TaskResult = self
            .call_typed(RpcMethod::RefreshMaintenanceTask, Some(params))
            .await?;
        Ok(result.task)
    }

    async fn complete_actions(
        &self,
        action_uids: Vec<ActionUid>,
    ) -> Result<Vec<CompleteResult>, MaintError> {
        let params = serde_json::to_value(CompleteActionParams { action_uids })?;
        let result: CompleteActionResult = self
            .call_typed(RpcMethod::CompleteAction, Some(params))
            .await?;
        Ok(result.action_statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_socket_is_transient_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let client = SocketCmsClient::new(dir.path().join("absent.sock"))
            .with_max_retries(2)
            .with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = client.list_cluster_nodes().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
        // 50ms + 100ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_create_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let client = SocketCmsClient::new(dir.path().join("absent.sock")).with_max_retries(5);

        let started = std::time::Instant::now();
        let err = client
            .create_task(
                TaskOptions {
                    task_uid: "maintenance-x".into(),
                    description: "test".into(),
                    availability_mode: maint_common::AvailabilityMode::Strong,
                },
                vec![],
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
