//! Rolling restart driver.
//!
//! Control path: CREATE -> POLL -> RESTART -> COMPLETE -> CHECK_DONE, back to
//! POLL until DONE or ABORT. Restarts run in a bounded `JoinSet`; each worker
//! gets its lock by value, restarts the node, completes the lock and reports
//! back. Only the control path touches the tracker.
//!
//! `create_task`, `list_tasks`, `refresh_task` and `complete_locks` are the
//! single-shot entry points used by the `maintenance` subcommands.

use maint_common::{
    new_task_uid, ActionState, ActionUid, AvailabilityMode, CompleteResult, CompleteStatus,
    LockScope, MaintError, MaintenanceTask, Node,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::errors::{EXIT_INTERRUPTED, EXIT_NODES_FAILED, EXIT_SUCCESS};
use crate::planner::Planner;
use crate::resolver::{match_locks, resolve, TopologySnapshot};
use crate::restarter::Restarter;
use crate::rpc_client::CmsClient;
use crate::tracker::{StatusCounts, TaskTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Create,
    Poll,
    Restart,
    Complete,
    CheckDone,
    Done,
    Abort,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Poll => "POLL",
            Self::Restart => "RESTART",
            Self::Complete => "COMPLETE",
            Self::CheckDone => "CHECK_DONE",
            Self::Done => "DONE",
            Self::Abort => "ABORT",
        };
        f.write_str(s)
    }
}

/// A node that was not restarted and completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNode {
    pub target: String,
    pub reason: String,
}

/// Why a run stopped before every lock was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortCause {
    pub exit_code: i32,
    pub message: String,
}

impl From<&MaintError> for AbortCause {
    fn from(err: &MaintError) -> Self {
        Self {
            exit_code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub task_uid: String,
    pub final_state: DriverState,
    pub restarted: Vec<String>,
    pub failed: Vec<FailedNode>,
    pub declined: Vec<String>,
    pub pending: Vec<String>,
    /// Failed nodes whose lock is still PERFORMED at the CMS
    pub held: Vec<String>,
    pub cause: Option<AbortCause>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.final_state == DriverState::Done && self.failed.is_empty() && self.declined.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if let Some(cause) = &self.cause {
            cause.exit_code
        } else if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_NODES_FAILED
        }
    }
}

/// Progress notifications for the presenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    TaskCreated { task_uid: String, locks: usize },
    Polled { counts: StatusCounts, in_flight: usize },
    RestartStarted { target: String, attempt: u32 },
    RestartRetrying { target: String, attempt: u32, error: String },
    RestartSucceeded { target: String },
    RestartFailed { target: String, error: String },
    LockCompleted { target: String, action_id: String },
    CompleteFailed { target: String, reason: String },
    Interrupted { in_flight: usize },
    Finished(RunSummary),
}

pub type EventSender = mpsc::UnboundedSender<DriverEvent>;

fn emit(events: &Option<EventSender>, event: DriverEvent) {
    if let Some(tx) = events {
        // presenter gone: keep driving, just stop reporting
        let _ = tx.send(event);
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub poll_interval: Duration,
    pub max_idle_polls: u32,
    pub restart_attempts: u32,
    pub restart_backoff: Duration,
    pub max_parallel_restarts: usize,
}

impl From<&DriverConfig> for DriverOptions {
    fn from(config: &DriverConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_idle_polls: config.max_idle_polls,
            restart_attempts: config.restart_attempts,
            restart_backoff: config.restart_backoff(),
            max_parallel_restarts: config.max_parallel_restarts,
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from(&DriverConfig::default())
    }
}

// ============================================================================
// Single-shot operations
// ============================================================================

/// A task accepted by the CMS
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task: MaintenanceTask,
    pub snapshot: TopologySnapshot,
}

/// Resolve, plan and submit a new task. `CreateTask` is sent exactly once.
pub async fn create_task<C: CmsClient + ?Sized>(
    client: &C,
    planner: &Planner,
    hosts: &[String],
    duration_secs: u64,
    mode: AvailabilityMode,
) -> Result<CreatedTask, MaintError> {
    planner.validate(duration_secs, hosts.len())?;

    let snapshot = TopologySnapshot::new(client.list_cluster_nodes().await?);
    let nodes = resolve(hosts, &snapshot)?;
    let plan = planner.plan(&nodes, duration_secs, mode)?;

    let task_uid = new_task_uid();
    let options = plan.task_options(&task_uid);
    info!(
        "Creating task {} with {} lock(s) in {} group(s), mode {}",
        task_uid,
        plan.lock_count(),
        plan.groups.len(),
        mode
    );
    let created = client.create_task(options.clone(), plan.groups).await?;

    Ok(CreatedTask {
        task: MaintenanceTask {
            task_uid: created.task_uid,
            owner: None,
            options,
            action_group_states: created.action_group_states,
        },
        snapshot,
    })
}

/// Tasks owned by the caller, or the single task asked for
pub async fn list_tasks<C: CmsClient + ?Sized>(
    client: &C,
    task_uid: Option<&str>,
) -> Result<Vec<MaintenanceTask>, MaintError> {
    if let Some(uid) = task_uid {
        return Ok(vec![client.get_task(uid).await?]);
    }

    let user = client.who_am_i().await?;
    debug!("Listing tasks of {}", user);
    let uids = client.list_tasks(Some(user)).await?;

    let mut tasks = Vec::with_capacity(uids.len());
    for uid in uids {
        match client.get_task(&uid).await {
            Ok(task) => tasks.push(task),
            // retired between list and get
            Err(MaintError::TaskNotFound(_)) => debug!("Task {} vanished while listing", uid),
            Err(e) => return Err(e),
        }
    }
    Ok(tasks)
}

pub async fn refresh_task<C: CmsClient + ?Sized>(
    client: &C,
    task_uid: &str,
) -> Result<MaintenanceTask, MaintError> {
    client.refresh_task(task_uid).await
}

/// Complete the PERFORMED locks of `task_uid` that `hosts` name
pub async fn complete_locks<C: CmsClient + ?Sized>(
    client: &C,
    task_uid: &str,
    hosts: &[String],
) -> Result<Vec<CompleteResult>, MaintError> {
    let task = client.get_task(task_uid).await?;
    let states: Vec<ActionState> = task.action_states().cloned().collect();
    let selected = match_locks(hosts, &states)?;

    let not_ready: Vec<String> = selected
        .iter()
        .filter(|s| s.status != maint_common::ActionStatus::Performed)
        .map(|s| format!("{} is {}", s.action.scope, s.status))
        .collect();
    if !not_ready.is_empty() {
        return Err(MaintError::Planning(format!(
            "cannot complete locks that are not PERFORMED: {}",
            not_ready.join(", ")
        )));
    }

    let uids = selected.iter().map(|s| s.action_uid.clone()).collect();
    client.complete_actions(uids).await
}

// ============================================================================
// Workers
// ============================================================================

#[derive(Debug)]
enum WorkerOutcome {
    Completed,
    RestartFailed(String),
    CompleteFailed(String),
    Crashed(String),
}

#[derive(Debug)]
struct WorkerReport {
    action_uid: ActionUid,
    target: String,
    outcome: WorkerOutcome,
}

struct Worker<C: ?Sized, R: ?Sized> {
    client: Arc<C>,
    restarter: Arc<R>,
    attempts: u32,
    backoff: Duration,
    events: Option<EventSender>,
}

impl<C: CmsClient + ?Sized, R: Restarter + ?Sized> Worker<C, R> {
    /// Restart one node, then complete its lock
    async fn run(self, lock: ActionState, node: Node) -> WorkerReport {
        let target = lock.action.scope.to_string();
        let report = |outcome| WorkerReport {
            action_uid: lock.action_uid.clone(),
            target: target.clone(),
            outcome,
        };

        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            emit(
                &self.events,
                DriverEvent::RestartStarted {
                    target: target.clone(),
                    attempt,
                },
            );
            match self.restarter.restart(&node).await {
                Ok(()) => break,
                Err(e) if attempt < attempts => {
                    warn!("Restart of {} failed (attempt {}): {}", node.fqdn, attempt, e);
                    emit(
                        &self.events,
                        DriverEvent::RestartRetrying {
                            target: target.clone(),
                            attempt,
                            error: e.to_string(),
                        },
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    let err = MaintError::Restart {
                        node: node.fqdn.clone(),
                        reason: e.to_string(),
                    };
                    error!("{}", err);
                    return report(WorkerOutcome::RestartFailed(e.to_string()));
                }
            }
        }
        emit(
            &self.events,
            DriverEvent::RestartSucceeded {
                target: target.clone(),
            },
        );

        match self
            .client
            .complete_actions(vec![lock.action_uid.clone()])
            .await
        {
            Ok(results) => {
                let result = results.into_iter().find(|r| r.action_uid == lock.action_uid);
                match result {
                    Some(r) if r.status == CompleteStatus::Success => report(WorkerOutcome::Completed),
                    Some(r) => report(WorkerOutcome::CompleteFailed(
                        r.reason.unwrap_or_else(|| "rejected by CMS".to_string()),
                    )),
                    None => report(WorkerOutcome::CompleteFailed(
                        "no status returned for action".to_string(),
                    )),
                }
            }
            Err(e) => report(WorkerOutcome::CompleteFailed(e.to_string())),
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

pub struct RollingRestartDriver<C: ?Sized, R: ?Sized> {
    client: Arc<C>,
    restarter: Arc<R>,
    options: DriverOptions,
    events: Option<EventSender>,
    shutdown: watch::Receiver<bool>,
    state: DriverState,
    task_uid: String,
}

/// Accumulates per-node results while driving
#[derive(Default)]
struct Outcomes {
    restarted: Vec<String>,
    failed: Vec<FailedNode>,
    cause: Option<AbortCause>,
}

impl<C, R> RollingRestartDriver<C, R>
where
    C: CmsClient + ?Sized + 'static,
    R: Restarter + ?Sized + 'static,
{
    pub fn new(
        client: Arc<C>,
        restarter: Arc<R>,
        options: DriverOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            restarter,
            options,
            events: None,
            shutdown,
            state: DriverState::Create,
            task_uid: String::new(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, to: DriverState) {
        if self.state != to {
            debug!(task_uid = %self.task_uid, from = %self.state, to = %to, "driver transition");
            self.state = to;
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// CREATE through DONE for a fresh set of hosts
    pub async fn run(
        &mut self,
        planner: &Planner,
        hosts: &[String],
        duration_secs: u64,
        mode: AvailabilityMode,
    ) -> Result<RunSummary, MaintError> {
        self.transition(DriverState::Create);
        let created = match create_task(self.client.as_ref(), planner, hosts, duration_secs, mode)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.transition(DriverState::Abort);
                return Err(e);
            }
        };

        self.task_uid = created.task.task_uid.clone();
        let tracker = TaskTracker::seed(&created.task);
        emit(
            &self.events,
            DriverEvent::TaskCreated {
                task_uid: self.task_uid.clone(),
                locks: tracker.len(),
            },
        );
        self.drive(tracker, created.snapshot).await
    }

    /// Pick up an existing task at POLL
    pub async fn resume(&mut self, task_uid: &str) -> Result<RunSummary, MaintError> {
        self.task_uid = task_uid.to_string();
        self.transition(DriverState::Poll);

        let seeded = async {
            let task = self.client.get_task(task_uid).await?;
            let nodes = self.client.list_cluster_nodes().await?;
            Ok::<_, MaintError>((task, TopologySnapshot::new(nodes)))
        }
        .await;
        let (task, snapshot) = match seeded {
            Ok(seeded) => seeded,
            Err(e) => {
                self.transition(DriverState::Abort);
                return Err(e);
            }
        };

        info!("Resuming task {} with {} lock(s)", task_uid, task.action_states().count());
        self.drive(TaskTracker::seed(&task), snapshot).await
    }

    async fn drive(
        &mut self,
        mut tracker: TaskTracker,
        snapshot: TopologySnapshot,
    ) -> Result<RunSummary, MaintError> {
        let mut workers: JoinSet<WorkerReport> = JoinSet::new();
        let mut outcomes = Outcomes::default();
        let mut shutdown = self.shutdown.clone();
        let mut idle_polls = 0u32;

        loop {
            self.transition(DriverState::CheckDone);
            if tracker.is_resolved() && workers.is_empty() {
                self.transition(DriverState::Done);
                return Ok(self.finish(&tracker, outcomes, false));
            }

            if self.is_shutting_down() {
                emit(
                    &self.events,
                    DriverEvent::Interrupted {
                        in_flight: workers.len(),
                    },
                );
                self.drain(&mut workers, &mut tracker, &mut outcomes).await;
                self.transition(DriverState::Abort);
                return Ok(self.finish(&tracker, outcomes, true));
            }

            let dispatched = self.dispatch(&mut workers, &mut tracker, &snapshot, &mut outcomes);

            // wait for a worker, the poll interval or an interrupt
            let mut progressed = dispatched > 0;
            if !workers.is_empty() {
                tokio::select! {
                    Some(joined) = workers.join_next() => {
                        self.handle_joined(joined, &mut tracker, &mut outcomes);
                        idle_polls = 0;
                        continue;
                    }
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                    _ = shutdown_requested(&mut shutdown) => continue,
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                    _ = shutdown_requested(&mut shutdown) => continue,
                }
            }

            self.transition(DriverState::Poll);
            match self.client.refresh_task(&self.task_uid).await {
                Ok(task) => {
                    let merged = tracker.merge(&task);
                    progressed |= merged.changed();
                    emit(
                        &self.events,
                        DriverEvent::Polled {
                            counts: tracker.counts(),
                            in_flight: tracker.in_flight_count(),
                        },
                    );
                }
                Err(MaintError::TaskNotFound(_)) if tracker.all_completed_here() => {
                    info!("Task {} retired by the CMS", self.task_uid);
                    self.transition(DriverState::Done);
                    return Ok(self.finish(&tracker, outcomes, false));
                }
                Err(e) => {
                    error!("Polling task {} failed: {}", self.task_uid, e);
                    self.drain(&mut workers, &mut tracker, &mut outcomes).await;
                    self.transition(DriverState::Abort);
                    outcomes.cause = Some(AbortCause::from(&e));
                    return Ok(self.finish(&tracker, outcomes, false));
                }
            }

            if progressed || !workers.is_empty() || !tracker.dispatchable().is_empty() {
                idle_polls = 0;
                continue;
            }

            idle_polls += 1;
            debug!(
                "No progress on task {} ({}/{})",
                self.task_uid, idle_polls, self.options.max_idle_polls
            );
            if idle_polls >= self.options.max_idle_polls {
                let err = MaintError::PendingTimeout {
                    task_uid: self.task_uid.clone(),
                    polls: idle_polls,
                };
                warn!("{}", err);
                self.transition(DriverState::Abort);
                outcomes.cause = Some(AbortCause::from(&err));
                return Ok(self.finish(&tracker, outcomes, false));
            }
        }
    }

    /// Hand PERFORMED locks to workers, up to the parallelism bound
    fn dispatch(
        &mut self,
        workers: &mut JoinSet<WorkerReport>,
        tracker: &mut TaskTracker,
        snapshot: &TopologySnapshot,
        outcomes: &mut Outcomes,
    ) -> usize {
        let capacity = self.options.max_parallel_restarts.max(1);
        let mut dispatched = 0;

        for lock in tracker.dispatchable() {
            if workers.len() >= capacity {
                break;
            }

            let Some(node) = node_for(&lock.action.scope, snapshot) else {
                let reason = "not present in cluster topology".to_string();
                warn!("Cannot restart {}: {}", lock.action.scope, reason);
                tracker.mark_abandoned(&lock.action_uid);
                outcomes.failed.push(FailedNode {
                    target: lock.action.scope.to_string(),
                    reason,
                });
                continue;
            };

            self.transition(DriverState::Restart);
            tracker.mark_in_flight(&lock.action_uid);
            let worker = Worker {
                client: Arc::clone(&self.client),
                restarter: Arc::clone(&self.restarter),
                attempts: self.options.restart_attempts,
                backoff: self.options.restart_backoff,
                events: self.events.clone(),
            };
            let action_uid = lock.action_uid.clone();
            let target = lock.action.scope.to_string();
            let run = tokio::spawn(worker.run(lock, node));
            workers.spawn(async move {
                // a panicking worker still reports which lock it held
                match run.await {
                    Ok(report) => report,
                    Err(e) => WorkerReport {
                        action_uid,
                        target,
                        outcome: WorkerOutcome::Crashed(e.to_string()),
                    },
                }
            });
            dispatched += 1;
        }

        dispatched
    }

    fn handle_joined(
        &mut self,
        joined: Result<WorkerReport, tokio::task::JoinError>,
        tracker: &mut TaskTracker,
        outcomes: &mut Outcomes,
    ) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                error!("Restart worker crashed: {}", e);
                return;
            }
        };

        self.transition(DriverState::Complete);
        match report.outcome {
            WorkerOutcome::Completed => {
                tracker.mark_completed(&report.action_uid);
                emit(
                    &self.events,
                    DriverEvent::LockCompleted {
                        target: report.target.clone(),
                        action_id: report.action_uid.action_id.clone(),
                    },
                );
                outcomes.restarted.push(report.target);
            }
            WorkerOutcome::RestartFailed(error) => {
                tracker.mark_abandoned(&report.action_uid);
                emit(
                    &self.events,
                    DriverEvent::RestartFailed {
                        target: report.target.clone(),
                        error: error.clone(),
                    },
                );
                outcomes.failed.push(FailedNode {
                    target: report.target,
                    reason: error,
                });
            }
            WorkerOutcome::Crashed(error) => {
                let reason = format!("restart worker crashed: {}", error);
                error!("{}: {}", report.target, reason);
                tracker.mark_abandoned(&report.action_uid);
                emit(
                    &self.events,
                    DriverEvent::RestartFailed {
                        target: report.target.clone(),
                        error: reason.clone(),
                    },
                );
                outcomes.failed.push(FailedNode {
                    target: report.target,
                    reason,
                });
            }
            WorkerOutcome::CompleteFailed(reason) => {
                tracker.mark_abandoned(&report.action_uid);
                emit(
                    &self.events,
                    DriverEvent::CompleteFailed {
                        target: report.target.clone(),
                        reason: reason.clone(),
                    },
                );
                outcomes.failed.push(FailedNode {
                    target: report.target,
                    reason,
                });
            }
        }
    }

    /// Let every in-flight restart-and-complete finish
    async fn drain(
        &mut self,
        workers: &mut JoinSet<WorkerReport>,
        tracker: &mut TaskTracker,
        outcomes: &mut Outcomes,
    ) {
        while let Some(joined) = workers.join_next().await {
            self.handle_joined(joined, tracker, outcomes);
        }
    }

    fn finish(&self, tracker: &TaskTracker, outcomes: Outcomes, interrupted: bool) -> RunSummary {
        let summary = RunSummary {
            task_uid: self.task_uid.clone(),
            final_state: self.state,
            restarted: outcomes.restarted,
            failed: outcomes.failed,
            declined: tracker
                .declined()
                .iter()
                .map(|s| s.action.scope.to_string())
                .collect(),
            pending: tracker
                .pending()
                .iter()
                .map(|s| s.action.scope.to_string())
                .collect(),
            held: tracker
                .held()
                .iter()
                .map(|s| s.action.scope.to_string())
                .collect(),
            cause: outcomes.cause,
            interrupted,
        };
        info!(
            "Task {} finished in {}: {} restarted, {} failed, {} declined, {} pending, {} held",
            summary.task_uid,
            summary.final_state,
            summary.restarted.len(),
            summary.failed.len(),
            summary.declined.len(),
            summary.pending.len(),
            summary.held.len()
        );
        emit(&self.events, DriverEvent::Finished(summary.clone()));
        summary
    }
}

fn node_for(scope: &LockScope, snapshot: &TopologySnapshot) -> Option<Node> {
    match scope {
        LockScope::Host(fqdn) => snapshot.by_fqdn(fqdn).cloned(),
        LockScope::Node(id) => snapshot.by_id(*id).cloned(),
    }
}

/// Resolves once shutdown is requested; never if the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
