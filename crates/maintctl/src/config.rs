//! Configuration for maintctl.
//!
//! Loads settings from `--config`, `$MAINTCTL_CONFIG` or
//! /etc/maintctl/config.toml, falling back to defaults. Command-line flags
//! are applied on top by the caller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/maintctl/config.toml";

/// CMS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsConfig {
    /// Socket of the CMS daemon
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Identity sent with every request
    #[serde(default)]
    pub user: Option<String>,

    /// Per-call timeout
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Retries for idempotent calls on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_rpc_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            user: None,
            rpc_timeout_secs: default_rpc_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Rolling restart driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Delay between polls while locks are pending
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive polls without progress before giving up
    #[serde(default = "default_max_idle_polls")]
    pub max_idle_polls: u32,

    /// Restart attempts per node, including the first
    #[serde(default = "default_restart_attempts")]
    pub restart_attempts: u32,

    /// Delay between restart attempts of the same node
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_ms: u64,

    /// Upper bound on concurrently restarting nodes
    #[serde(default = "default_max_parallel")]
    pub max_parallel_restarts: usize,

    /// Nodes per action group
    #[serde(default = "default_nodes_per_group")]
    pub nodes_per_group: usize,

    /// Longest lock a plan may request
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_max_idle_polls() -> u32 {
    150
}

fn default_restart_attempts() -> u32 {
    3
}

fn default_restart_backoff() -> u64 {
    1_000
}

fn default_max_parallel() -> usize {
    4
}

fn default_nodes_per_group() -> usize {
    1
}

fn default_max_duration() -> u64 {
    24 * 60 * 60
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_idle_polls: default_max_idle_polls(),
            restart_attempts: default_restart_attempts(),
            restart_backoff_ms: default_restart_backoff(),
            max_parallel_restarts: default_max_parallel(),
            nodes_per_group: default_nodes_per_group(),
            max_duration_secs: default_max_duration(),
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

/// How nodes are restarted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Shell command; `{fqdn}` and `{node_id}` are substituted
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_restart_timeout")]
    pub timeout_secs: u64,
}

fn default_restart_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintConfig {
    #[serde(default)]
    pub cms: CmsConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub restart: RestartConfig,
}

impl MaintConfig {
    /// Discover config file path
    ///
    /// Priority:
    /// 1. Explicit --config flag
    /// 2. $MAINTCTL_CONFIG environment variable
    /// 3. /etc/maintctl/config.toml if it exists
    fn discover_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var("MAINTCTL_CONFIG") {
            return Some(PathBuf::from(path));
        }

        let path = Path::new(CONFIG_PATH);
        path.exists().then(|| path.to_path_buf())
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::discover_path(explicit) {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: MaintConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Socket discovery: flag, then $CMS_SOCKET, then config, then default
    pub fn socket_path(&self, explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = std::env::var("CMS_SOCKET") {
            return path;
        }

        self.cms
            .socket_path
            .clone()
            .unwrap_or_else(|| maint_common::SOCKET_PATH.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MaintConfig::default();
        assert_eq!(config.cms.rpc_timeout_secs, 5);
        assert_eq!(config.driver.nodes_per_group, 1);
        assert_eq!(config.driver.restart_attempts, 3);
        assert!(config.restart.command.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cms]
socket_path = "/tmp/cms.sock"
user = "ops"

[driver]
max_parallel_restarts = 2
nodes_per_group = 3

[restart]
command = "ssh {{fqdn}} sudo systemctl restart ydbd"
"#
        )
        .unwrap();

        let config = MaintConfig::load_from(file.path()).unwrap();
        assert_eq!(config.cms.user.as_deref(), Some("ops"));
        assert_eq!(config.cms.max_retries, 3);
        assert_eq!(config.driver.max_parallel_restarts, 2);
        assert_eq!(config.driver.nodes_per_group, 3);
        assert_eq!(config.driver.poll_interval_ms, 2_000);
        assert_eq!(
            config.restart.command.as_deref(),
            Some("ssh {fqdn} sudo systemctl restart ydbd")
        );
        assert_eq!(config.socket_path(Some("/explicit.sock")), "/explicit.sock");
    }

    #[test]
    fn test_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[driver\nbroken").unwrap();
        assert!(MaintConfig::load_from(file.path()).is_err());
    }
}
