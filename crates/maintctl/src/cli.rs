//! Command-line surface of maintctl.

use clap::{Args, Parser, Subcommand};
use maint_common::AvailabilityMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "maintctl")]
#[command(about = "Maintenance tasks and rolling restarts through the cluster CMS", long_about = None)]
#[command(version = maint_common::VERSION)]
pub struct Cli {
    /// CMS socket (overrides $CMS_SOCKET and the config file)
    #[arg(long, global = true)]
    pub socket: Option<String>,

    /// Config file (default: $MAINTCTL_CONFIG or /etc/maintctl/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity presented to the CMS
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage maintenance tasks by hand
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },

    /// Restart nodes one lock at a time, or resume a task
    Restart(RestartArgs),
}

#[derive(Subcommand, Debug)]
pub enum MaintenanceCommands {
    /// Create a maintenance task
    Create(CreateArgs),

    /// List your maintenance tasks
    List(ListArgs),

    /// Complete locks of a task after the work is done
    Complete(CompleteArgs),

    /// Ask the CMS to re-evaluate pending locks
    Refresh(RefreshArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Comma-separated FQDNs or node ids
    #[arg(long)]
    pub hosts: String,

    /// Lock duration in seconds
    #[arg(long)]
    pub duration: u64,

    #[arg(long, default_value = "strong")]
    pub availability_mode: AvailabilityMode,

    /// Nodes per action group (default from config)
    #[arg(long)]
    pub nodes_per_group: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub task_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct CompleteArgs {
    #[arg(long)]
    pub task_id: String,

    /// Comma-separated FQDNs or node ids, as used at creation
    #[arg(long)]
    pub hosts: String,
}

#[derive(Args, Debug)]
pub struct RefreshArgs {
    #[arg(long)]
    pub task_id: String,
}

#[derive(Args, Debug)]
pub struct RestartArgs {
    /// Comma-separated FQDNs or node ids
    #[arg(long, conflicts_with = "task_id", required_unless_present = "task_id")]
    pub hosts: Option<String>,

    /// Resume an existing task instead of creating one
    #[arg(long)]
    pub task_id: Option<String>,

    /// Lock duration in seconds
    #[arg(long, default_value_t = 600)]
    pub duration: u64,

    #[arg(long, default_value = "strong")]
    pub availability_mode: AvailabilityMode,

    #[arg(long)]
    pub nodes_per_group: Option<usize>,

    /// Restart command (overrides [restart] command)
    #[arg(long)]
    pub command: Option<String>,
}

impl Cli {
    /// Command name for the invocation log
    pub fn command_name(&self) -> &'static str {
        match &self.command {
            Commands::Maintenance { command } => match command {
                MaintenanceCommands::Create(_) => "maintenance create",
                MaintenanceCommands::List(_) => "maintenance list",
                MaintenanceCommands::Complete(_) => "maintenance complete",
                MaintenanceCommands::Refresh(_) => "maintenance refresh",
            },
            Commands::Restart(_) => "restart",
        }
    }

    /// Task uid given on the command line, if any
    pub fn task_id(&self) -> Option<&str> {
        match &self.command {
            Commands::Maintenance { command } => match command {
                MaintenanceCommands::Create(_) => None,
                MaintenanceCommands::List(args) => args.task_id.as_deref(),
                MaintenanceCommands::Complete(args) => Some(&args.task_id),
                MaintenanceCommands::Refresh(args) => Some(&args.task_id),
            },
            Commands::Restart(args) => args.task_id.as_deref(),
        }
    }
}
