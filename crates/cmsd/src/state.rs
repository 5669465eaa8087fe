//! CMS state: cluster layout, maintenance tasks and lock granting.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use maint_common::rpc::{codes, CreateTaskParams, CreateTaskResult};
use maint_common::{
    ActionGroupStates, ActionReason, ActionState, ActionStatus, ActionUid, AvailabilityMode,
    CompleteResult, CompleteStatus, LockScope, MaintenanceTask, Node, NodeId, TaskOptions,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{CmsdConfig, Limits};

/// A request the CMS refuses to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: i32,
    pub message: String,
}

impl Rejection {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    fn not_found(task_uid: &str) -> Self {
        Self::new(codes::TASK_NOT_FOUND, format!("task {} not found", task_uid))
    }

    fn unauthorized(task_uid: &str, owner: &str) -> Self {
        Self::new(
            codes::UNAUTHORIZED,
            format!("task {} belongs to {}", task_uid, owner),
        )
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

struct TaskRecord {
    owner: Option<String>,
    options: TaskOptions,
    groups: Vec<ActionGroupStates>,
}

impl TaskRecord {
    fn snapshot(&self) -> MaintenanceTask {
        MaintenanceTask {
            task_uid: self.options.task_uid.clone(),
            owner: self.owner.clone(),
            options: self.options.clone(),
            action_group_states: self.groups.clone(),
        }
    }

    /// Only the owner may act on an owned task
    fn authorize(&self, caller: Option<&str>) -> Result<(), Rejection> {
        match self.owner.as_deref() {
            Some(owner) if caller != Some(owner) => {
                Err(Rejection::unauthorized(&self.options.task_uid, owner))
            }
            _ => Ok(()),
        }
    }

    fn is_resolved(&self) -> bool {
        self.groups
            .iter()
            .flat_map(|g| g.action_states.iter())
            .all(|a| a.status.is_terminal())
    }
}

/// The cluster management service's view of the world
pub struct CmsState {
    nodes: Vec<Node>,
    limits: Limits,
    tasks: Vec<TaskRecord>,
    started_at: Instant,
}

/// Lock expiry, or None when the duration does not fit a timestamp
fn lock_deadline(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(ChronoDuration::try_seconds(secs)?)
}

fn node_id_for(nodes: &[Node], scope: &LockScope) -> Option<NodeId> {
    match scope {
        LockScope::Node(id) => nodes.iter().find(|n| n.id == *id).map(|n| n.id),
        LockScope::Host(fqdn) => nodes.iter().find(|n| n.fqdn == *fqdn).map(|n| n.id),
    }
}

impl CmsState {
    pub fn new(config: CmsdConfig) -> Self {
        Self {
            nodes: config.nodes,
            limits: config.limits,
            tasks: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn max_unavailable(&self, mode: AvailabilityMode) -> Option<usize> {
        match mode {
            AvailabilityMode::Strong => Some(self.limits.strong_max_unavailable),
            AvailabilityMode::Weak => Some(self.limits.weak_max_unavailable),
            AvailabilityMode::Force => None,
        }
    }

    fn find(&self, task_uid: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.options.task_uid == task_uid)
    }

    /// Nodes currently held by a PERFORMED lock of any task
    fn locked_nodes(&self) -> HashSet<NodeId> {
        self.tasks
            .iter()
            .flat_map(|t| t.groups.iter())
            .flat_map(|g| g.action_states.iter())
            .filter(|a| a.status == ActionStatus::Performed)
            .filter_map(|a| node_id_for(&self.nodes, &a.action.scope))
            .collect()
    }

    pub fn create_task(
        &mut self,
        owner: Option<String>,
        params: CreateTaskParams,
    ) -> Result<CreateTaskResult, Rejection> {
        let CreateTaskParams {
            task_options,
            action_groups,
        } = params;
        let task_uid = task_options.task_uid.clone();

        if task_uid.trim().is_empty() {
            return Err(Rejection::invalid("task uid must not be empty"));
        }
        if self.find(&task_uid).is_some() {
            return Err(Rejection::new(
                codes::DUPLICATE_TASK,
                format!("task {} already exists", task_uid),
            ));
        }
        if action_groups.is_empty() {
            return Err(Rejection::invalid("task has no action groups"));
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let limit = self.max_unavailable(task_options.availability_mode);
        for group in &action_groups {
            if group.actions.is_empty() {
                return Err(Rejection::invalid("action group has no actions"));
            }
            for action in &group.actions {
                let id = node_id_for(&self.nodes, &action.scope).ok_or_else(|| {
                    Rejection::invalid(format!("unknown {}", action.scope))
                })?;
                if !seen.insert(id) {
                    return Err(Rejection::invalid(format!(
                        "{} requested more than once",
                        action.scope
                    )));
                }
            }
            if let Some(limit) = limit {
                if group.actions.len() > limit {
                    return Err(Rejection::new(
                        codes::AVAILABILITY_VIOLATED,
                        format!(
                            "group of {} nodes exceeds {} availability limit of {}",
                            group.actions.len(),
                            task_options.availability_mode,
                            limit
                        ),
                    ));
                }
            }
        }

        let groups: Vec<ActionGroupStates> = action_groups
            .into_iter()
            .map(|group| {
                let group_id = uuid::Uuid::new_v4().to_string();
                let action_states = group
                    .actions
                    .into_iter()
                    .map(|action| ActionState {
                        action_uid: ActionUid {
                            task_uid: task_uid.clone(),
                            group_id: group_id.clone(),
                            action_id: uuid::Uuid::new_v4().to_string(),
                        },
                        action,
                        status: ActionStatus::Pending,
                        reason: ActionReason::Generic,
                        deadline: None,
                    })
                    .collect();
                ActionGroupStates {
                    group_id,
                    action_states,
                }
            })
            .collect();

        info!(
            "Created task {} ({} groups, mode {}, owner {:?})",
            task_uid,
            groups.len(),
            task_options.availability_mode,
            owner
        );

        self.tasks.push(TaskRecord {
            owner,
            options: task_options,
            groups,
        });
        let index = self.tasks.len() - 1;
        self.evaluate(index);

        Ok(CreateTaskResult {
            task_uid,
            action_group_states: self.tasks[index].groups.clone(),
        })
    }

    /// Uids of live tasks, optionally restricted to one owner
    pub fn list_tasks(&self, user: Option<&str>) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| match user {
                Some(user) => t.owner.as_deref() == Some(user),
                None => true,
            })
            .map(|t| t.options.task_uid.clone())
            .collect()
    }

    pub fn get_task(&self, task_uid: &str) -> Result<MaintenanceTask, Rejection> {
        self.find(task_uid)
            .map(|i| self.tasks[i].snapshot())
            .ok_or_else(|| Rejection::not_found(task_uid))
    }

    /// Re-evaluate pending locks of a task, then return it
    pub fn refresh_task(&mut self, task_uid: &str) -> Result<MaintenanceTask, Rejection> {
        let index = self
            .find(task_uid)
            .ok_or_else(|| Rejection::not_found(task_uid))?;
        self.evaluate(index);
        let snapshot = self.tasks[index].snapshot();
        self.retire_resolved();
        Ok(snapshot)
    }

    /// Grant pending groups of one task while the availability mode allows
    fn evaluate(&mut self, index: usize) {
        let mut locked = self.locked_nodes();
        let now = Utc::now();
        let limit = self.max_unavailable(self.tasks[index].options.availability_mode);
        let max_duration = self.limits.max_lock_duration_secs;

        let nodes = &self.nodes;
        let task = &mut self.tasks[index];

        for group in task.groups.iter_mut() {
            if !group
                .action_states
                .iter()
                .all(|a| a.status == ActionStatus::Pending)
            {
                continue;
            }

            let deadlines: Option<Vec<DateTime<Utc>>> = group
                .action_states
                .iter()
                .map(|a| a.action.duration_secs)
                .map(|secs| {
                    if secs <= max_duration {
                        lock_deadline(now, secs)
                    } else {
                        None
                    }
                })
                .collect();
            let Some(deadlines) = deadlines else {
                for action in group.action_states.iter_mut() {
                    action.status = ActionStatus::Declined;
                    action.reason = ActionReason::WrongRequest;
                }
                info!("Declined group {}: lock duration too long", group.group_id);
                continue;
            };

            let ids: Vec<NodeId> = group
                .action_states
                .iter()
                .filter_map(|a| node_id_for(nodes, &a.action.scope))
                .collect();

            let reason = if ids.iter().any(|id| locked.contains(id)) {
                Some(ActionReason::DisabledNodesLimitReached)
            } else if limit.is_some_and(|l| locked.len() + ids.len() > l) {
                Some(ActionReason::TooManyUnavailableNodes)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    debug!("Group {} stays pending: {}", group.group_id, reason);
                    for action in group.action_states.iter_mut() {
                        action.reason = reason;
                    }
                }
                None => {
                    for (action, deadline) in group.action_states.iter_mut().zip(deadlines) {
                        action.status = ActionStatus::Performed;
                        action.reason = ActionReason::Ok;
                        action.deadline = Some(deadline);
                    }
                    locked.extend(ids);
                    info!("Granted group {} of task {}", group.group_id, task.options.task_uid);
                }
            }
        }
    }

    /// Complete PERFORMED actions and retire tasks with nothing left open
    pub fn complete_actions(
        &mut self,
        caller: Option<&str>,
        action_uids: &[ActionUid],
    ) -> Result<Vec<CompleteResult>, Rejection> {
        if action_uids.is_empty() {
            return Err(Rejection::invalid("no action uids given"));
        }
        if let Some(missing) = action_uids.iter().find(|u| self.find(&u.task_uid).is_none()) {
            if action_uids.iter().all(|u| u.task_uid == missing.task_uid) {
                return Err(Rejection::not_found(&missing.task_uid));
            }
        }
        for uid in action_uids {
            if let Some(index) = self.find(&uid.task_uid) {
                self.tasks[index].authorize(caller)?;
            }
        }

        let mut results = Vec::with_capacity(action_uids.len());
        for uid in action_uids {
            let (status, reason) = match self.action_mut(uid) {
                None => (CompleteStatus::Failure, Some("action not found".to_string())),
                Some(action) if action.status == ActionStatus::Performed => {
                    action.status = ActionStatus::Completed;
                    action.reason = ActionReason::Ok;
                    (CompleteStatus::Success, None)
                }
                Some(action) => (
                    CompleteStatus::Failure,
                    Some(format!("action is {}", action.status)),
                ),
            };
            results.push(CompleteResult {
                action_uid: uid.clone(),
                status,
                reason,
            });
        }

        self.retire_resolved();
        Ok(results)
    }

    /// Drop tasks whose every lock is terminal
    fn retire_resolved(&mut self) {
        self.tasks.retain(|t| {
            let resolved = t.is_resolved();
            if resolved {
                info!("Task {} resolved, retiring", t.options.task_uid);
            }
            !resolved
        });
    }

    fn action_mut(&mut self, uid: &ActionUid) -> Option<&mut ActionState> {
        let index = self.find(&uid.task_uid)?;
        self.tasks[index]
            .groups
            .iter_mut()
            .filter(|g| g.group_id == uid.group_id)
            .flat_map(|g| g.action_states.iter_mut())
            .find(|a| a.action_uid.action_id == uid.action_id)
    }
}

/// Thread-safe shared state handle
pub type SharedState = Arc<RwLock<CmsState>>;

pub fn create_shared_state(config: CmsdConfig) -> SharedState {
    Arc::new(RwLock::new(CmsState::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maint_common::{ActionGroup, LockAction};

    fn params(uid: &str, mode: AvailabilityMode, scopes: &[&[LockScope]]) -> CreateTaskParams {
        CreateTaskParams {
            task_options: TaskOptions {
                task_uid: uid.to_string(),
                description: "test".to_string(),
                availability_mode: mode,
            },
            action_groups: scopes
                .iter()
                .map(|group| ActionGroup {
                    actions: group
                        .iter()
                        .map(|scope| LockAction {
                            scope: scope.clone(),
                            duration_secs: 180,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn host(n: u32) -> LockScope {
        LockScope::Host(format!("ydb-{}.ydb.tech", n))
    }

    fn statuses(task: &MaintenanceTask) -> Vec<ActionStatus> {
        task.action_states().map(|a| a.status).collect()
    }

    #[test]
    fn test_strong_grants_one_lock_at_a_time() {
        let mut cms = CmsState::new(CmsdConfig::default());
        cms.create_task(
            Some("root".into()),
            params("t1", AvailabilityMode::Strong, &[&[host(1)], &[host(2)]]),
        )
        .unwrap();

        let task = cms.get_task("t1").unwrap();
        assert_eq!(
            statuses(&task),
            vec![ActionStatus::Performed, ActionStatus::Pending]
        );
        let performed = task.action_states().next().unwrap();
        assert!(performed.deadline.is_some());
    }

    #[test]
    fn test_weak_and_force_allow_more() {
        let mut cms = CmsState::new(CmsdConfig::default());
        cms.create_task(
            None,
            params(
                "weak",
                AvailabilityMode::Weak,
                &[&[host(1)], &[host(2)], &[host(3)]],
            ),
        )
        .unwrap();
        let task = cms.get_task("weak").unwrap();
        assert_eq!(
            statuses(&task),
            vec![
                ActionStatus::Performed,
                ActionStatus::Performed,
                ActionStatus::Pending
            ]
        );

        cms.create_task(
            None,
            params("force", AvailabilityMode::Force, &[&[host(4), host(5), host(6)]]),
        )
        .unwrap();
        let task = cms.get_task("force").unwrap();
        assert!(statuses(&task)
            .iter()
            .all(|s| *s == ActionStatus::Performed));
    }

    #[test]
    fn test_strong_rejects_oversized_group() {
        let mut cms = CmsState::new(CmsdConfig::default());
        let err = cms
            .create_task(
                None,
                params("t1", AvailabilityMode::Strong, &[&[host(1), host(2)]]),
            )
            .unwrap_err();
        assert_eq!(err.code, codes::AVAILABILITY_VIOLATED);
        assert_eq!(cms.task_count(), 0);
    }

    #[test]
    fn test_unknown_node_and_duplicate_uid() {
        let mut cms = CmsState::new(CmsdConfig::default());
        let err = cms
            .create_task(None, params("t1", AvailabilityMode::Strong, &[&[LockScope::Node(99)]]))
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);

        cms.create_task(None, params("t1", AvailabilityMode::Strong, &[&[host(1)]]))
            .unwrap();
        let err = cms
            .create_task(None, params("t1", AvailabilityMode::Strong, &[&[host(2)]]))
            .unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE_TASK);
    }

    #[test]
    fn test_complete_then_refresh_grants_next_and_retires() {
        let mut cms = CmsState::new(CmsdConfig::default());
        let created = cms
            .create_task(
                Some("root".into()),
                params("t1", AvailabilityMode::Strong, &[&[host(1)], &[host(2)]]),
            )
            .unwrap();
        let first = created.action_group_states[0].action_states[0]
            .action_uid
            .clone();
        let second = created.action_group_states[1].action_states[0]
            .action_uid
            .clone();

        // pending lock cannot be completed
        let results = cms.complete_actions(Some("root"), &[second.clone()]).unwrap();
        assert_eq!(results[0].status, CompleteStatus::Failure);

        let results = cms.complete_actions(Some("root"), &[first]).unwrap();
        assert_eq!(results[0].status, CompleteStatus::Success);

        // get does not re-evaluate, refresh does
        let task = cms.get_task("t1").unwrap();
        assert_eq!(
            statuses(&task),
            vec![ActionStatus::Completed, ActionStatus::Pending]
        );
        let task = cms.refresh_task("t1").unwrap();
        assert_eq!(
            statuses(&task),
            vec![ActionStatus::Completed, ActionStatus::Performed]
        );

        cms.complete_actions(Some("root"), &[second]).unwrap();
        assert!(cms.list_tasks(Some("root")).is_empty());
        assert_eq!(
            cms.get_task("t1").unwrap_err().code,
            codes::TASK_NOT_FOUND
        );
    }

    #[test]
    fn test_locks_are_shared_across_tasks() {
        let mut cms = CmsState::new(CmsdConfig::default());
        cms.create_task(None, params("a", AvailabilityMode::Strong, &[&[host(1)]]))
            .unwrap();
        cms.create_task(None, params("b", AvailabilityMode::Strong, &[&[host(2)]]))
            .unwrap();
        let task = cms.get_task("b").unwrap();
        let state = task.action_states().next().unwrap();
        assert_eq!(state.status, ActionStatus::Pending);
        assert_eq!(state.reason, ActionReason::TooManyUnavailableNodes);
    }

    #[test]
    fn test_list_filters_by_owner() {
        let mut cms = CmsState::new(CmsdConfig::default());
        cms.create_task(
            Some("alice".into()),
            params("a", AvailabilityMode::Force, &[&[host(1)]]),
        )
        .unwrap();
        cms.create_task(
            Some("bob".into()),
            params("b", AvailabilityMode::Force, &[&[host(2)]]),
        )
        .unwrap();
        assert_eq!(cms.list_tasks(Some("alice")), vec!["a".to_string()]);
        assert_eq!(cms.list_tasks(None).len(), 2);
    }

    #[test]
    fn test_overlong_lock_is_declined() {
        let mut cms = CmsState::new(CmsdConfig::default());
        let mut p = params("t1", AvailabilityMode::Strong, &[&[host(1)]]);
        p.action_groups[0].actions[0].duration_secs = 7 * 24 * 60 * 60;
        cms.create_task(None, p).unwrap();
        let task = cms.get_task("t1").unwrap();
        assert_eq!(statuses(&task), vec![ActionStatus::Declined]);

        // the refresh that reports the decline also retires the task
        let task = cms.refresh_task("t1").unwrap();
        assert_eq!(statuses(&task), vec![ActionStatus::Declined]);
        assert_eq!(cms.task_count(), 0);
    }

    #[test]
    fn test_unrepresentable_duration_is_declined() {
        let mut config = CmsdConfig::default();
        config.limits.max_lock_duration_secs = u64::MAX;
        let mut cms = CmsState::new(config);

        // beyond i64 seconds
        let mut p = params("t1", AvailabilityMode::Strong, &[&[host(1)]]);
        p.action_groups[0].actions[0].duration_secs = u64::MAX - 1;
        cms.create_task(None, p).unwrap();
        let state = cms.get_task("t1").unwrap().action_states().next().cloned().unwrap();
        assert_eq!(state.status, ActionStatus::Declined);
        assert_eq!(state.reason, ActionReason::WrongRequest);

        // fits i64 but not a timestamp
        let mut p = params("t2", AvailabilityMode::Strong, &[&[host(2)]]);
        p.action_groups[0].actions[0].duration_secs = 1_000_000_000_000_000;
        cms.create_task(None, p).unwrap();
        let task = cms.get_task("t2").unwrap();
        assert_eq!(statuses(&task), vec![ActionStatus::Declined]);

        // ordinary locks still fit under the raised limit
        cms.create_task(None, params("t3", AvailabilityMode::Strong, &[&[host(3)]]))
            .unwrap();
        let state = cms.get_task("t3").unwrap().action_states().next().cloned().unwrap();
        assert_eq!(state.status, ActionStatus::Performed);
        assert!(state.deadline.is_some());
    }

    #[test]
    fn test_only_owner_completes_locks() {
        let mut cms = CmsState::new(CmsdConfig::default());
        let created = cms
            .create_task(
                Some("alice".into()),
                params("t1", AvailabilityMode::Strong, &[&[host(1)]]),
            )
            .unwrap();
        let uid = created.action_group_states[0].action_states[0]
            .action_uid
            .clone();

        let err = cms.complete_actions(Some("bob"), &[uid.clone()]).unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
        let err = cms.complete_actions(None, &[uid.clone()]).unwrap_err();
        assert_eq!(err.code, codes::UNAUTHORIZED);
        assert_eq!(
            statuses(&cms.get_task("t1").unwrap()),
            vec![ActionStatus::Performed]
        );

        let results = cms.complete_actions(Some("alice"), &[uid]).unwrap();
        assert_eq!(results[0].status, CompleteStatus::Success);
    }
}
