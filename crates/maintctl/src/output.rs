//! Output formatting - plain text, one format per command.
//!
//! Formatters return strings so commands decide where they go: task data
//! to stdout, driver progress to stderr.

use maint_common::{ActionReason, ActionState, CompleteResult, MaintenanceTask};
use std::fmt::Write;

use crate::driver::{DriverEvent, RunSummary};

pub const NO_TASKS: &str = "There are no maintenance tasks";

pub fn format_task_created(task_uid: &str) -> String {
    format!(
        "Your task id is:\n\n{}\n\nPlease write it down for refreshing and completing the task later.\n",
        task_uid
    )
}

/// `  Lock on host X PERFORMED` or `  Lock on node N PENDING, REASON`
pub fn format_lock(state: &ActionState) -> String {
    let mut line = format!("  Lock on {} {}", state.action.scope, state.status);
    if state.reason != ActionReason::Ok {
        let _ = write!(line, ", {}", state.reason);
    }
    line
}

pub fn format_task(task: &MaintenanceTask) -> String {
    let mut out = format!("Uid: {}\n", task.task_uid);
    for state in task.action_states() {
        out.push_str(&format_lock(state));
        out.push('\n');
    }
    out
}

pub fn format_tasks(tasks: &[MaintenanceTask]) -> String {
    if tasks.is_empty() {
        return format!("{}\n", NO_TASKS);
    }
    tasks
        .iter()
        .map(format_task)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_complete_results(results: &[CompleteResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = write!(
            out,
            "  Completed action id: {}, status: {}",
            result.action_uid.action_id, result.status
        );
        if let Some(reason) = &result.reason {
            let _ = write!(out, ", {}", reason);
        }
        out.push('\n');
    }
    out
}

/// One progress line per driver event
pub fn format_event(event: &DriverEvent) -> String {
    match event {
        DriverEvent::TaskCreated { task_uid, locks } => {
            format!("[TASK] {} created with {} lock(s)", task_uid, locks)
        }
        DriverEvent::Polled { counts, in_flight } => format!(
            "[POLL] pending {}, performed {}, completed {}, declined {}, restarting {}",
            counts.pending, counts.performed, counts.completed, counts.declined, in_flight
        ),
        DriverEvent::RestartStarted { target, attempt } if *attempt > 1 => {
            format!("[RESTART] {} (attempt {})", target, attempt)
        }
        DriverEvent::RestartStarted { target, .. } => format!("[RESTART] {}", target),
        DriverEvent::RestartRetrying {
            target,
            attempt,
            error,
        } => format!("[RETRY] {} after attempt {}: {}", target, attempt, error),
        DriverEvent::RestartSucceeded { target } => format!("[OK] {} restarted", target),
        DriverEvent::RestartFailed { target, error } => {
            format!("[FAILED] {}: {}", target, error)
        }
        DriverEvent::LockCompleted { target, action_id } => {
            format!("[DONE] {} lock {} completed", target, action_id)
        }
        DriverEvent::CompleteFailed { target, reason } => {
            format!("[FAILED] completing {}: {}", target, reason)
        }
        DriverEvent::Interrupted { in_flight } => format!(
            "[INTERRUPTED] waiting for {} restart(s) in flight",
            in_flight
        ),
        DriverEvent::Finished(summary) => format!(
            "[FINISHED] {} in state {}",
            summary.task_uid, summary.final_state
        ),
    }
}

pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = format!("Task {}: {}\n", summary.task_uid, summary.final_state);
    if let Some(cause) = &summary.cause {
        let _ = writeln!(out, "  Stopped: {}", cause.message);
    }
    for target in &summary.restarted {
        let _ = writeln!(out, "  Restarted {}", target);
    }
    for failed in &summary.failed {
        let _ = writeln!(out, "  Failed {}: {}", failed.target, failed.reason);
    }
    for target in &summary.declined {
        let _ = writeln!(out, "  Declined {}", target);
    }
    for target in &summary.pending {
        let _ = writeln!(out, "  Pending {}", target);
    }
    for target in &summary.held {
        let _ = writeln!(out, "  Still locked {}", target);
    }
    if !summary.held.is_empty() {
        let _ = writeln!(
            out,
            "\nRelease held locks with: maintctl maintenance complete --task-id={} --hosts=<hosts>",
            summary.task_uid
        );
    }
    if summary.interrupted || !summary.pending.is_empty() || !summary.failed.is_empty() {
        let _ = writeln!(
            out,
            "\nResume with: maintctl restart --task-id={}",
            summary.task_uid
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AbortCause, DriverState, FailedNode};
    use maint_common::{
        ActionGroupStates, ActionStatus, ActionUid, AvailabilityMode, CompleteStatus, LockAction,
        LockScope, TaskOptions,
    };

    fn state(scope: LockScope, status: ActionStatus, reason: ActionReason) -> ActionState {
        ActionState {
            action_uid: ActionUid {
                task_uid: "maintenance-1".into(),
                group_id: "g".into(),
                action_id: "a".into(),
            },
            action: LockAction {
                scope,
                duration_secs: 180,
            },
            status,
            reason,
            deadline: None,
        }
    }

    #[test]
    fn test_task_created() {
        let text = format_task_created("maintenance-abc");
        assert!(text.starts_with("Your task id is:\n\nmaintenance-abc\n\n"));
        assert!(text.ends_with("completing the task later.\n"));
    }

    #[test]
    fn test_lock_lines() {
        assert_eq!(
            format_lock(&state(
                LockScope::Host("ydb-1.ydb.tech".into()),
                ActionStatus::Performed,
                ActionReason::Ok
            )),
            "  Lock on host ydb-1.ydb.tech PERFORMED"
        );
        assert_eq!(
            format_lock(&state(
                LockScope::Node(2),
                ActionStatus::Pending,
                ActionReason::TooManyUnavailableNodes
            )),
            "  Lock on node 2 PENDING, TOO_MANY_UNAVAILABLE_NODES"
        );
    }

    #[test]
    fn test_task_listing() {
        let task = MaintenanceTask {
            task_uid: "maintenance-1".into(),
            owner: Some("ops".into()),
            options: TaskOptions {
                task_uid: "maintenance-1".into(),
                description: "Rolling restart maintenance task".into(),
                availability_mode: AvailabilityMode::Strong,
            },
            action_group_states: vec![ActionGroupStates {
                group_id: "g".into(),
                action_states: vec![state(
                    LockScope::Node(1),
                    ActionStatus::Performed,
                    ActionReason::Ok,
                )],
            }],
        };
        assert_eq!(
            format_tasks(&[task]),
            "Uid: maintenance-1\n  Lock on node 1 PERFORMED\n"
        );
        assert_eq!(format_tasks(&[]), "There are no maintenance tasks\n");
    }

    #[test]
    fn test_complete_results() {
        let uid = ActionUid {
            task_uid: "maintenance-1".into(),
            group_id: "g".into(),
            action_id: "a-1".into(),
        };
        let text = format_complete_results(&[
            CompleteResult {
                action_uid: uid.clone(),
                status: CompleteStatus::Success,
                reason: None,
            },
            CompleteResult {
                action_uid: uid,
                status: CompleteStatus::Failure,
                reason: Some("action is PENDING".into()),
            },
        ]);
        assert_eq!(
            text,
            "  Completed action id: a-1, status: SUCCESS\n  Completed action id: a-1, status: FAILURE, action is PENDING\n"
        );
    }

    #[test]
    fn test_summary_suggests_resume() {
        let summary = RunSummary {
            task_uid: "maintenance-1".into(),
            final_state: DriverState::Done,
            restarted: vec!["host ydb-1.ydb.tech".into()],
            failed: vec![FailedNode {
                target: "host ydb-2.ydb.tech".into(),
                reason: "exit 1".into(),
            }],
            declined: vec![],
            pending: vec![],
            held: vec![],
            cause: None,
            interrupted: false,
        };
        let text = format_summary(&summary);
        assert!(text.contains("  Restarted host ydb-1.ydb.tech\n"));
        assert!(text.contains("  Failed host ydb-2.ydb.tech: exit 1\n"));
        assert!(text.contains("maintctl restart --task-id=maintenance-1"));
        assert!(!text.contains("Stopped"));
        assert!(!text.contains("maintenance complete"));
    }

    #[test]
    fn test_aborted_summary_names_held_locks() {
        let summary = RunSummary {
            task_uid: "maintenance-1".into(),
            final_state: DriverState::Abort,
            restarted: vec!["host ydb-1.ydb.tech".into()],
            failed: vec![FailedNode {
                target: "host ydb-2.ydb.tech".into(),
                reason: "exit 1".into(),
            }],
            declined: vec![],
            pending: vec!["host ydb-3.ydb.tech".into()],
            held: vec!["host ydb-2.ydb.tech".into()],
            cause: Some(AbortCause {
                exit_code: 5,
                message: "Locks still pending after 5 polls for task maintenance-1".into(),
            }),
            interrupted: false,
        };
        let text = format_summary(&summary);
        assert!(text.starts_with(
            "Task maintenance-1: ABORT\n  Stopped: Locks still pending after 5 polls"
        ));
        assert!(text.contains("  Pending host ydb-3.ydb.tech\n"));
        assert!(text.contains("  Still locked host ydb-2.ydb.tech\n"));
        assert!(text.contains(
            "maintctl maintenance complete --task-id=maintenance-1 --hosts=<hosts>"
        ));
        assert!(text.contains("maintctl restart --task-id=maintenance-1"));
    }
}
