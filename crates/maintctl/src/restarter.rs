//! Restarter seam.
//!
//! Production code uses `CommandRestarter`, which runs an operator-supplied
//! shell command per node. Tests use `FakeRestarter` with scripted failures.

use async_trait::async_trait;
use maint_common::Node;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::RestartConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestartError {
    #[error("no restart command configured (set [restart] command)")]
    NotConfigured,

    #[error("restart command could not be spawned: {0}")]
    Spawn(String),

    #[error("restart command exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("restart timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Restarter Trait
// ============================================================================

/// Performs the physical restart of one node
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart(&self, node: &Node) -> Result<(), RestartError>;
}

// ============================================================================
// Command Restarter (Production)
// ============================================================================

pub struct CommandRestarter {
    command: Option<String>,
    timeout: Duration,
}

impl CommandRestarter {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &RestartConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Substitute `{fqdn}` and `{node_id}` in the command template
    pub fn render(template: &str, node: &Node) -> String {
        template
            .replace("{fqdn}", &node.fqdn)
            .replace("{node_id}", &node.id.to_string())
    }
}

#[async_trait]
impl Restarter for CommandRestarter {
    async fn restart(&self, node: &Node) -> Result<(), RestartError> {
        let template = self.command.as_deref().ok_or(RestartError::NotConfigured)?;
        let command = Self::render(template, node);
        debug!("Restarting {}: sh -c {:?}", node.fqdn, command);

        let mut child = Command::new("sh");
        child.arg("-c").arg(&command).kill_on_drop(true);
        // own process group, so a terminal Ctrl-C reaches maintctl only
        #[cfg(unix)]
        child.process_group(0);
        let child = child.output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| RestartError::Spawn(e.to_string()))?,
            Err(_) => return Err(RestartError::Timeout(self.timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(RestartError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

// ============================================================================
// Fake Restarter (Testing)
// ============================================================================

#[derive(Debug, Default)]
struct FakeScript {
    /// Remaining failures per fqdn before restarts succeed
    failures: HashMap<String, u32>,
    calls: Vec<String>,
}

/// Restarter with scripted per-node failures and a call log
#[derive(Debug, Clone, Default)]
pub struct FakeRestarter {
    script: Arc<Mutex<FakeScript>>,
    delay: Duration,
}

impl FakeRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` restarts of `fqdn`
    pub fn failing(self, fqdn: &str, times: u32) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.failures.insert(fqdn.to_string(), times);
        }
        self
    }

    /// Every restart takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Restart calls in the order they started
    pub fn calls(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Restarter for FakeRestarter {
    async fn restart(&self, node: &Node) -> Result<(), RestartError> {
        let fail = match self.script.lock() {
            Ok(mut script) => {
                script.calls.push(node.fqdn.clone());
                match script.failures.get_mut(&node.fqdn) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            }
            Err(_) => false,
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if fail {
            Err(RestartError::Failed {
                code: Some(1),
                stderr: format!("scripted failure for {}", node.fqdn),
            })
        } else {
            Ok(())
        }
    }
}
