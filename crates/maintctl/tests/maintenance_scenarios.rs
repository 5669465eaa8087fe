//! End-to-end maintenance command scenarios against an in-process cmsd.

mod common;

use common::Cms;
use maint_common::{AvailabilityMode, MaintError, TASK_UUID_PREFIX};
use maintctl::cli::{CompleteArgs, CreateArgs, ListArgs, RefreshArgs};
use maintctl::commands;
use maintctl::planner::{GroupingPolicy, Planner};
use maintctl::SocketCmsClient;

fn planner() -> Planner {
    Planner::new(GroupingPolicy::default(), 86_400)
}

fn text(buf: Vec<u8>) -> String {
    String::from_utf8(buf).unwrap()
}

async fn create(client: &SocketCmsClient, hosts: &str) -> String {
    let mut out = Vec::new();
    let outcome = commands::create(
        client,
        &planner(),
        &CreateArgs {
            hosts: hosts.into(),
            duration: 180,
            availability_mode: AvailabilityMode::Strong,
            nodes_per_group: None,
        },
        &mut out,
    )
    .await
    .unwrap();

    let out = text(out);
    assert!(out.starts_with("Your task id is:\n\n"), "{}", out);
    assert!(out.ends_with("Please write it down for refreshing and completing the task later.\n"));

    let task_uid = out.lines().nth(2).unwrap().to_string();
    assert!(task_uid.starts_with(TASK_UUID_PREFIX));
    assert!(uuid::Uuid::parse_str(&task_uid[TASK_UUID_PREFIX.len()..]).is_ok());
    assert_eq!(outcome.task_uid.as_deref(), Some(task_uid.as_str()));
    task_uid
}

async fn list(client: &SocketCmsClient) -> String {
    let mut out = Vec::new();
    commands::list(client, &ListArgs { task_id: None }, &mut out)
        .await
        .unwrap();
    text(out)
}

async fn complete(client: &SocketCmsClient, task_uid: &str, hosts: &str) -> String {
    let mut out = Vec::new();
    commands::complete(
        client,
        &CompleteArgs {
            task_id: task_uid.into(),
            hosts: hosts.into(),
        },
        &mut out,
    )
    .await
    .unwrap();
    text(out)
}

async fn refresh(client: &SocketCmsClient, task_uid: &str) -> String {
    let mut out = Vec::new();
    commands::refresh(
        client,
        &RefreshArgs {
            task_id: task_uid.into(),
        },
        &mut out,
    )
    .await
    .unwrap();
    text(out)
}

fn assert_completed_one(out: &str) {
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 1, "{}", out);
    let rest = lines[0]
        .strip_prefix("  Completed action id: ")
        .unwrap_or_else(|| panic!("unexpected line: {}", lines[0]));
    let (action_id, status) = rest.split_once(", status: ").unwrap();
    assert!(uuid::Uuid::parse_str(action_id).is_ok());
    assert_eq!(status, "SUCCESS");
}

#[tokio::test]
async fn test_scenario_hosts_strong_rolling() {
    let cms = Cms::start().await;
    let client = cms.client("root");

    let task_uid = create(&client, "ydb-1.ydb.tech,ydb-2.ydb.tech").await;

    let listed = list(&client).await;
    assert!(listed.starts_with(&format!("Uid: {}\n", task_uid)));
    assert!(listed.contains("  Lock on host ydb-1.ydb.tech PERFORMED\n"));
    assert!(listed.contains("  Lock on host ydb-2.ydb.tech PENDING, TOO_MANY_UNAVAILABLE_NODES\n"));

    assert_completed_one(&complete(&client, &task_uid, "ydb-1.ydb.tech").await);

    let refreshed = refresh(&client, &task_uid).await;
    assert!(refreshed.contains("  Lock on host ydb-1.ydb.tech COMPLETED\n"));
    assert!(refreshed.contains("  Lock on host ydb-2.ydb.tech PERFORMED\n"));

    let listed = list(&client).await;
    assert!(listed.contains("  Lock on host ydb-2.ydb.tech PERFORMED\n"));

    assert_completed_one(&complete(&client, &task_uid, "ydb-2.ydb.tech").await);

    assert_eq!(list(&client).await, "There are no maintenance tasks\n");
}

#[tokio::test]
async fn test_scenario_node_ids_strong_rolling() {
    let cms = Cms::start().await;
    let client = cms.client("root");

    let task_uid = create(&client, "1,2").await;

    let listed = list(&client).await;
    assert!(listed.contains("  Lock on node 1 PERFORMED\n"));
    assert!(listed.contains("  Lock on node 2 PENDING, "));

    assert_completed_one(&complete(&client, &task_uid, "1").await);

    let refreshed = refresh(&client, &task_uid).await;
    assert!(refreshed.contains("  Lock on node 2 PERFORMED\n"));

    assert_completed_one(&complete(&client, &task_uid, "2").await);
    assert_eq!(list(&client).await, "There are no maintenance tasks\n");
}

#[tokio::test]
async fn test_list_only_shows_own_tasks() {
    let cms = Cms::start().await;
    let ops = cms.client("ops");
    let other = cms.client("someone-else");

    let task_uid = create(&ops, "ydb-5.ydb.tech").await;

    assert!(list(&ops).await.contains(&task_uid));
    assert_eq!(list(&other).await, "There are no maintenance tasks\n");
}

#[tokio::test]
async fn test_complete_refuses_pending_lock() {
    let cms = Cms::start().await;
    let client = cms.client("root");
    let task_uid = create(&client, "ydb-1.ydb.tech,ydb-2.ydb.tech").await;

    let mut out = Vec::new();
    let err = commands::complete(
        &client,
        &CompleteArgs {
            task_id: task_uid.clone(),
            hosts: "ydb-2.ydb.tech".into(),
        },
        &mut out,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MaintError>(),
        Some(MaintError::Planning(_))
    ));
    assert!(out.is_empty());

    // the refused call left ydb-1 untouched
    let listed = list(&client).await;
    assert!(listed.contains("  Lock on host ydb-1.ydb.tech PERFORMED\n"));
}

#[tokio::test]
async fn test_unknown_host_fails_before_create() {
    let cms = Cms::start().await;
    let client = cms.client("root");

    let mut out = Vec::new();
    let err = commands::create(
        &client,
        &planner(),
        &CreateArgs {
            hosts: "ydb-1.ydb.tech,ydb-42.ydb.tech".into(),
            duration: 180,
            availability_mode: AvailabilityMode::Strong,
            nodes_per_group: None,
        },
        &mut out,
    )
    .await
    .unwrap_err();

    assert_eq!(maintctl::errors::exit_code_for(&err), 2);
    assert_eq!(list(&client).await, "There are no maintenance tasks\n");
}

#[tokio::test]
async fn test_refresh_unknown_task() {
    let cms = Cms::start().await;
    let client = cms.client("root");

    let mut out = Vec::new();
    let err = commands::refresh(
        &client,
        &RefreshArgs {
            task_id: "maintenance-does-not-exist".into(),
        },
        &mut out,
    )
    .await
    .unwrap_err();
    assert_eq!(maintctl::errors::exit_code_for(&err), 4);
}
