//! Task state tracker.
//!
//! Last-known view of a task's locks, merged from get/refresh responses.
//! The lock set is fixed when the tracker is seeded; merges only move
//! statuses forward. Local bookkeeping (dispatched, abandoned) lives beside
//! the CMS view and is never sent anywhere.

use maint_common::{ActionState, ActionStatus, ActionUid, MaintenanceTask};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Per-status lock counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub performed: usize,
    pub declined: usize,
    pub completed: usize,
}

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Locks whose status moved forward
    pub advanced: Vec<ActionUid>,
    /// Locks the update tried to move backwards
    pub regressions: usize,
    /// Action uids in the update that the tracker never saw
    pub unknown: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.advanced.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TaskTracker {
    task_uid: String,
    /// Group order, then action order within a group
    order: Vec<ActionUid>,
    locks: BTreeMap<ActionUid, ActionState>,
    in_flight: HashSet<ActionUid>,
    abandoned: HashSet<ActionUid>,
    completed_here: HashSet<ActionUid>,
}

impl TaskTracker {
    /// Seed from the first full snapshot of a task
    pub fn seed(task: &MaintenanceTask) -> Self {
        let mut order = Vec::new();
        let mut locks = BTreeMap::new();
        for state in task.action_states() {
            if locks.insert(state.action_uid.clone(), state.clone()).is_none() {
                order.push(state.action_uid.clone());
            }
        }

        Self {
            task_uid: task.task_uid.clone(),
            order,
            locks,
            in_flight: HashSet::new(),
            abandoned: HashSet::new(),
            completed_here: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, uid: &ActionUid) -> Option<&ActionState> {
        self.locks.get(uid)
    }

    /// Locks in task order
    pub fn locks(&self) -> impl Iterator<Item = &ActionState> {
        self.order.iter().filter_map(|uid| self.locks.get(uid))
    }

    /// Merge a fresh snapshot of the same task
    pub fn merge(&mut self, task: &MaintenanceTask) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for update in task.action_states() {
            let Some(known) = self.locks.get_mut(&update.action_uid) else {
                debug!(
                    "Ignoring unknown action {} in task {}",
                    update.action_uid.action_id, self.task_uid
                );
                outcome.unknown += 1;
                continue;
            };

            if known.status == update.status {
                known.reason = update.reason;
                known.deadline = update.deadline;
                continue;
            }

            if !known.status.can_advance_to(update.status) {
                warn!(
                    "Ignoring status regression {} -> {} for action {}",
                    known.status, update.status, update.action_uid.action_id
                );
                outcome.regressions += 1;
                continue;
            }

            known.status = update.status;
            known.reason = update.reason;
            known.deadline = update.deadline;
            outcome.advanced.push(update.action_uid.clone());
        }

        outcome
    }

    /// PERFORMED locks that no worker holds and that were not given up on
    pub fn dispatchable(&self) -> Vec<ActionState> {
        self.locks()
            .filter(|s| s.status == ActionStatus::Performed)
            .filter(|s| !self.in_flight.contains(&s.action_uid))
            .filter(|s| !self.abandoned.contains(&s.action_uid))
            .cloned()
            .collect()
    }

    pub fn mark_in_flight(&mut self, uid: &ActionUid) {
        self.in_flight.insert(uid.clone());
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Restart failed for good; the lock stays PERFORMED at the CMS
    pub fn mark_abandoned(&mut self, uid: &ActionUid) {
        self.in_flight.remove(uid);
        self.abandoned.insert(uid.clone());
    }

    pub fn is_abandoned(&self, uid: &ActionUid) -> bool {
        self.abandoned.contains(uid)
    }

    /// The CMS accepted completion of this lock
    pub fn mark_completed(&mut self, uid: &ActionUid) {
        self.in_flight.remove(uid);
        if let Some(state) = self.locks.get_mut(uid) {
            if state.status.can_advance_to(ActionStatus::Completed) {
                state.status = ActionStatus::Completed;
                self.completed_here.insert(uid.clone());
            }
        }
    }

    /// Every tracked lock was completed by this process
    pub fn all_completed_here(&self) -> bool {
        !self.is_empty() && self.order.iter().all(|uid| self.completed_here.contains(uid))
    }

    /// Nothing left to wait for: no PENDING lock and no live PERFORMED lock
    pub fn is_resolved(&self) -> bool {
        self.locks().all(|s| match s.status {
            ActionStatus::Pending => false,
            ActionStatus::Performed => self.abandoned.contains(&s.action_uid),
            ActionStatus::Declined | ActionStatus::Completed => true,
        })
    }

    pub fn pending(&self) -> Vec<&ActionState> {
        self.locks()
            .filter(|s| s.status == ActionStatus::Pending)
            .collect()
    }

    /// Given-up locks the CMS still holds; they need a manual `complete`
    pub fn held(&self) -> Vec<&ActionState> {
        self.locks()
            .filter(|s| s.status == ActionStatus::Performed && self.is_abandoned(&s.action_uid))
            .collect()
    }

    pub fn declined(&self) -> Vec<&ActionState> {
        self.locks()
            .filter(|s| s.status == ActionStatus::Declined)
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for state in self.locks() {
            match state.status {
                ActionStatus::Pending => counts.pending += 1,
                ActionStatus::Performed => counts.performed += 1,
                ActionStatus::Declined => counts.declined += 1,
                ActionStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }
}
