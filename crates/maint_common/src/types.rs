//! Maintenance task model exchanged with the CMS.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type NodeId = u32;

/// A cluster node as reported by `list_cluster_nodes`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub fqdn: String,
}

/// Policy the CMS uses to bound how many locks may be granted at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityMode {
    Strong,
    Weak,
    Force,
}

impl fmt::Display for AvailabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strong => write!(f, "strong"),
            Self::Weak => write!(f, "weak"),
            Self::Force => write!(f, "force"),
        }
    }
}

impl FromStr for AvailabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(Self::Strong),
            "weak" => Ok(Self::Weak),
            "force" => Ok(Self::Force),
            other => Err(format!(
                "unknown availability mode '{}', expected one of: strong, weak, force",
                other
            )),
        }
    }
}

/// What a lock is taken on, kept in the form the operator addressed it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    Host(String),
    Node(NodeId),
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(fqdn) => write!(f, "host {}", fqdn),
            Self::Node(id) => write!(f, "node {}", id),
        }
    }
}

/// A single requested lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockAction {
    pub scope: LockScope,
    pub duration_secs: u64,
}

/// Locks that must be granted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub actions: Vec<LockAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub task_uid: String,
    pub description: String,
    pub availability_mode: AvailabilityMode,
}

/// Server-assigned identity of one action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionUid {
    pub task_uid: String,
    pub group_id: String,
    pub action_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Performed,
    Declined,
    Completed,
}

impl ActionStatus {
    /// Position in the PENDING -> PERFORMED -> COMPLETED order.
    /// DECLINED sits beside COMPLETED: both are terminal.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Performed => 1,
            Self::Declined | Self::Completed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Completed)
    }

    /// Whether moving from `self` to `next` respects lock monotonicity
    pub fn can_advance_to(self, next: ActionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Self::Pending, _) => true,
            (Self::Performed, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Performed => "PERFORMED",
            Self::Declined => "DECLINED",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// Why the CMS holds a lock in its current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionReason {
    Ok,
    TooManyUnavailableNodes,
    DisabledNodesLimitReached,
    WrongRequest,
    Generic,
}

impl fmt::Display for ActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::TooManyUnavailableNodes => "TOO_MANY_UNAVAILABLE_NODES",
            Self::DisabledNodesLimitReached => "DISABLED_NODES_LIMIT_REACHED",
            Self::WrongRequest => "WRONG_REQUEST",
            Self::Generic => "GENERIC",
        };
        f.write_str(s)
    }
}

/// Observed state of one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub action_uid: ActionUid,
    pub action: LockAction,
    pub status: ActionStatus,
    pub reason: ActionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroupStates {
    pub group_id: String,
    pub action_states: Vec<ActionState>,
}

/// Full task as returned by get/refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub task_uid: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub options: TaskOptions,
    pub action_group_states: Vec<ActionGroupStates>,
}

impl MaintenanceTask {
    /// All lock states in group order
    pub fn action_states(&self) -> impl Iterator<Item = &ActionState> {
        self.action_group_states
            .iter()
            .flat_map(|g| g.action_states.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompleteStatus {
    Success,
    Failure,
}

impl fmt::Display for CompleteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Failure => f.write_str("FAILURE"),
        }
    }
}

/// Outcome of completing one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResult {
    pub action_uid: ActionUid,
    pub status: CompleteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
