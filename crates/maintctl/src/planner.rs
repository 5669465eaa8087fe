//! Action group planner.
//!
//! Chunks resolved nodes into action groups in resolved order. The output
//! depends only on the inputs, so the same request always produces the same
//! groups with the same membership.

use maint_common::{
    ActionGroup, AvailabilityMode, LockAction, MaintError, TaskOptions, RESTART_TASK_DESCRIPTION,
};

use crate::resolver::ResolvedNode;

/// How many nodes share one action group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingPolicy {
    pub nodes_per_group: usize,
}

impl Default for GroupingPolicy {
    fn default() -> Self {
        Self { nodes_per_group: 1 }
    }
}

/// A task ready to be submitted to the CMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub availability_mode: AvailabilityMode,
    pub duration_secs: u64,
    pub groups: Vec<ActionGroup>,
}

impl Plan {
    pub fn task_options(&self, task_uid: impl Into<String>) -> TaskOptions {
        TaskOptions {
            task_uid: task_uid.into(),
            description: RESTART_TASK_DESCRIPTION.to_string(),
            availability_mode: self.availability_mode,
        }
    }

    pub fn lock_count(&self) -> usize {
        self.groups.iter().map(|g| g.actions.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Planner {
    policy: GroupingPolicy,
    max_duration_secs: u64,
}

impl Planner {
    pub fn new(policy: GroupingPolicy, max_duration_secs: u64) -> Self {
        Self {
            policy,
            max_duration_secs,
        }
    }

    /// Input checks that need no topology; run before any RPC
    pub fn validate(&self, duration_secs: u64, host_count: usize) -> Result<(), MaintError> {
        if host_count == 0 {
            return Err(MaintError::Planning("no hosts to maintain".to_string()));
        }
        if self.policy.nodes_per_group == 0 {
            return Err(MaintError::Planning(
                "nodes per group must be at least 1".to_string(),
            ));
        }
        if duration_secs == 0 {
            return Err(MaintError::Planning(
                "duration must be greater than zero".to_string(),
            ));
        }
        if duration_secs > self.max_duration_secs {
            return Err(MaintError::Planning(format!(
                "duration {}s exceeds the maximum of {}s",
                duration_secs, self.max_duration_secs
            )));
        }
        Ok(())
    }

    pub fn plan(
        &self,
        nodes: &[ResolvedNode],
        duration_secs: u64,
        availability_mode: AvailabilityMode,
    ) -> Result<Plan, MaintError> {
        self.validate(duration_secs, nodes.len())?;

        let groups = nodes
            .chunks(self.policy.nodes_per_group)
            .map(|chunk| ActionGroup {
                actions: chunk
                    .iter()
                    .map(|node| LockAction {
                        scope: node.lock_scope(),
                        duration_secs,
                    })
                    .collect(),
            })
            .collect();

        Ok(Plan {
            availability_mode,
            duration_secs,
            groups,
        })
    }
}
