//! Configuration for cmsd.
//!
//! Loads the cluster layout and availability limits from a TOML file, or
//! falls back to a small built-in cluster.

use anyhow::{Context, Result};
use maint_common::Node;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/cmsd/config.toml";

/// How many nodes may be locked at once, per availability mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_strong_max")]
    pub strong_max_unavailable: usize,

    #[serde(default = "default_weak_max")]
    pub weak_max_unavailable: usize,

    /// Groups asking for longer locks are declined
    #[serde(default = "default_max_lock_duration")]
    pub max_lock_duration_secs: u64,
}

fn default_strong_max() -> usize {
    1
}

fn default_weak_max() -> usize {
    2
}

fn default_max_lock_duration() -> u64 {
    24 * 60 * 60
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            strong_max_unavailable: default_strong_max(),
            weak_max_unavailable: default_weak_max(),
            max_lock_duration_secs: default_max_lock_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsdConfig {
    #[serde(default = "default_nodes")]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub limits: Limits,
}

fn default_nodes() -> Vec<Node> {
    (1..=8)
        .map(|id| Node {
            id,
            fqdn: format!("ydb-{}.ydb.tech", id),
        })
        .collect()
}

impl Default for CmsdConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            limits: Limits::default(),
        }
    }
}

impl CmsdConfig {
    /// Load from an explicit path, else the system path, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let path = Path::new(CONFIG_PATH);
        if path.exists() {
            return Self::load_from(path);
        }

        info!("No config at {}, using built-in cluster layout", CONFIG_PATH);
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: CmsdConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if config.nodes.is_empty() {
            warn!("Config {} declares no nodes", path.display());
        }
        Ok(config)
    }
}
