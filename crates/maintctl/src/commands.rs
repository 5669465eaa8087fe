//! Command implementations for maintctl
//!
//! Each command writes its textual result to `out` and returns the outcome
//! used for the exit status and the invocation log.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::cli::{
    Cli, Commands, CompleteArgs, CreateArgs, ListArgs, MaintenanceCommands, RefreshArgs,
    RestartArgs,
};
use crate::config::MaintConfig;
use crate::driver::{self, DriverOptions, RollingRestartDriver};
use crate::errors::EXIT_SUCCESS;
use crate::output;
use crate::planner::{GroupingPolicy, Planner};
use crate::resolver::parse_host_list;
use crate::restarter::CommandRestarter;
use crate::rpc_client::{CmsClient, SocketCmsClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub task_uid: Option<String>,
}

impl CommandOutcome {
    fn ok() -> Self {
        Self {
            exit_code: EXIT_SUCCESS,
            task_uid: None,
        }
    }

    fn for_task(task_uid: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_SUCCESS,
            task_uid: Some(task_uid.into()),
        }
    }
}

/// Planner honoring the config and an optional per-command override
pub fn planner_for(config: &MaintConfig, nodes_per_group: Option<usize>) -> Planner {
    Planner::new(
        GroupingPolicy {
            nodes_per_group: nodes_per_group.unwrap_or(config.driver.nodes_per_group),
        },
        config.driver.max_duration_secs,
    )
}

/// Load config, build the client and run the selected command
pub async fn dispatch(
    cli: &Cli,
    shutdown: watch::Receiver<bool>,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let config = MaintConfig::load(cli.config.as_deref())?;
    let mut client = SocketCmsClient::from_config(&config, cli.socket.as_deref());
    if cli.user.is_some() {
        client = client.with_user(cli.user.clone());
    }

    match &cli.command {
        Commands::Maintenance { command } => match command {
            MaintenanceCommands::Create(args) => {
                let planner = planner_for(&config, args.nodes_per_group);
                create(&client, &planner, args, out).await
            }
            MaintenanceCommands::List(args) => list(&client, args, out).await,
            MaintenanceCommands::Complete(args) => complete(&client, args, out).await,
            MaintenanceCommands::Refresh(args) => refresh(&client, args, out).await,
        },
        Commands::Restart(args) => restart(Arc::new(client), &config, args, shutdown, out).await,
    }
}

pub async fn create<C: CmsClient + ?Sized>(
    client: &C,
    planner: &Planner,
    args: &CreateArgs,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let hosts = parse_host_list(&args.hosts);
    let created = driver::create_task(
        client,
        planner,
        &hosts,
        args.duration,
        args.availability_mode,
    )
    .await?;

    write!(out, "{}", output::format_task_created(&created.task.task_uid))?;
    Ok(CommandOutcome::for_task(created.task.task_uid))
}

pub async fn list<C: CmsClient + ?Sized>(
    client: &C,
    args: &ListArgs,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let tasks = driver::list_tasks(client, args.task_id.as_deref()).await?;
    write!(out, "{}", output::format_tasks(&tasks))?;
    Ok(CommandOutcome::ok())
}

pub async fn complete<C: CmsClient + ?Sized>(
    client: &C,
    args: &CompleteArgs,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let hosts = parse_host_list(&args.hosts);
    if hosts.is_empty() {
        bail!("--hosts must name at least one host or node id");
    }

    let results = driver::complete_locks(client, &args.task_id, &hosts)
        .await
        .with_context(|| format!("completing locks of {}", args.task_id))?;
    write!(out, "{}", output::format_complete_results(&results))?;
    Ok(CommandOutcome::for_task(args.task_id.clone()))
}

pub async fn refresh<C: CmsClient + ?Sized>(
    client: &C,
    args: &RefreshArgs,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let task = driver::refresh_task(client, &args.task_id)
        .await
        .with_context(|| format!("refreshing {}", args.task_id))?;
    write!(out, "{}", output::format_task(&task))?;
    Ok(CommandOutcome::for_task(args.task_id.clone()))
}

pub async fn restart<C: CmsClient + 'static>(
    client: Arc<C>,
    config: &MaintConfig,
    args: &RestartArgs,
    shutdown: watch::Receiver<bool>,
    out: &mut dyn Write,
) -> Result<CommandOutcome> {
    let mut restart_config = config.restart.clone();
    if args.command.is_some() {
        restart_config.command = args.command.clone();
    }
    if restart_config.command.is_none() {
        bail!("no restart command configured; pass --command or set [restart] command");
    }
    let restarter = CommandRestarter::from_config(&restart_config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let presenter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            eprintln!("{}", output::format_event(&event));
        }
    });

    let mut driver = RollingRestartDriver::new(
        client,
        Arc::new(restarter),
        DriverOptions::from(&config.driver),
        shutdown,
    )
    .with_events(tx);

    let result = match (&args.task_id, &args.hosts) {
        (Some(task_uid), _) => driver.resume(task_uid).await,
        (None, Some(hosts)) => {
            let planner = planner_for(config, args.nodes_per_group);
            let hosts = parse_host_list(hosts);
            driver
                .run(&planner, &hosts, args.duration, args.availability_mode)
                .await
        }
        (None, None) => bail!("either --hosts or --task-id is required"),
    };

    // closes the event channel so the presenter drains and exits
    drop(driver);
    let _ = presenter.await;

    let summary = result?;
    info!("Restart of task {} exited in {}", summary.task_uid, summary.final_state);
    write!(out, "{}", output::format_summary(&summary))?;
    Ok(CommandOutcome {
        exit_code: summary.exit_code(),
        task_uid: Some(summary.task_uid),
    })
}
