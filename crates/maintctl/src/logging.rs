//! Logging for maintctl invocations
//!
//! Diagnostics go through `tracing` to stderr. Each invocation also appends
//! one JSON line to an XDG state file.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber; `RUST_LOG` wins over `--verbose`
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Log entry for each maintctl invocation
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 timestamp
    pub ts: String,

    /// Request ID (UUID)
    pub req_id: String,

    /// Command name
    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_uid: Option<String>,

    pub exit_code: i32,

    pub duration_ms: u64,

    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEntry {
    /// Discover log file path with fallback chain
    ///
    /// Priority:
    /// 1. $MAINTCTL_LOG_FILE environment variable (explicit override)
    /// 2. $XDG_STATE_HOME/maintctl/ctl.jsonl (XDG standard)
    /// 3. ~/.local/state/maintctl/ctl.jsonl (XDG fallback)
    fn discover_log_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MAINTCTL_LOG_FILE") {
            return Some(PathBuf::from(path));
        }

        if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
            return Some(Path::new(&xdg_state).join("maintctl/ctl.jsonl"));
        }

        if let Ok(home) = std::env::var("HOME") {
            return Some(Path::new(&home).join(".local/state/maintctl/ctl.jsonl"));
        }

        None
    }

    /// Append to the discovered log file; failures are dropped
    pub fn write(&self) {
        if let Some(path) = Self::discover_log_path() {
            if let Err(e) = self.write_to(&path) {
                tracing::debug!("Could not write invocation log {}: {}", path.display(), e);
            }
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Generate request ID
    pub fn generate_req_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Get current timestamp in ISO 8601 format
    pub fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}
