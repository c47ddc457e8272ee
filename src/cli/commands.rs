use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "claude-warden")]
#[command(author, version, about = "Resilience supervisor for Claude Code task pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Project root (default: current directory)
    #[arg(short, long, global = true, env = "WARDEN_PROJECT")]
    pub project: Option<PathBuf>,
}

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize claude-warden in the project
    Init {
        /// Overwrite an existing config.toml with defaults
        #[arg(long)]
        force: bool,
    },

    /// Inspect and edit the shared execution state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Retry failed tasks
    Retry {
        #[command(subcommand)]
        action: RetryAction,
    },

    /// Health checks
    Health {
        #[command(subcommand)]
        action: HealthAction,
    },

    /// Recovery points and manual recovery
    Recover {
        #[command(subcommand)]
        action: RecoverAction,
    },

    /// Run or control the supervisor
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum StateAction {
    /// Show pipeline status and tasks
    Show,
    /// Create the state document
    Init {
        /// Task ids in pipeline order
        tasks: Vec<String>,

        /// JSON file with an array of tasks ({"id", "title", "expectedArtifacts"})
        #[arg(long, conflicts_with = "tasks")]
        from: Option<PathBuf>,

        /// Replace an existing state document
        #[arg(long)]
        force: bool,
    },
    /// Mark a task in progress
    Start { task_id: String },
    /// Mark a task completed
    Complete { task_id: String },
    /// Mark a task failed and record the classified error
    Fail {
        task_id: String,
        #[arg(short, long, default_value = "")]
        error: String,
    },
    /// Mark a task blocked
    Block {
        task_id: String,
        #[arg(short, long, default_value = "blocked by operator")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum RetryAction {
    /// Keep retrying failed tasks until stopped
    Monitor,
    /// Retry one task now
    Task {
        task_id: String,
        /// Failure text to classify (default: the task's last error)
        #[arg(short, long)]
        error: Option<String>,
    },
    /// Show retry counters and per-task records
    Stats,
    /// Trim the error log to the newest entries
    Prune {
        #[arg(long, default_value = "500")]
        keep: usize,
    },
}

#[derive(Subcommand)]
pub enum HealthAction {
    /// Run every check once (exit 1 on high or critical findings)
    Check,
    /// Check on the configured interval and print findings
    Watch,
    /// Write and print the status report
    Report,
}

#[derive(Subcommand)]
pub enum RecoverAction {
    /// Restore corrupt state and retry every eligible failed task
    Auto,
    /// Choose a recovery action from a menu
    Interactive,
    /// Hand a task back to the agent (default: the current or first unfinished task)
    Continue { task_id: Option<String> },
    /// Replace the state with a recovery point
    Restore { id: String },
    /// Check a task's expected artifacts
    Verify { task_id: String },
    /// List recovery points, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Write the recovery report
    Report,
    /// Delete the oldest recovery points
    Prune {
        /// Points to keep (default: recovery.max_recovery_points)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum MonitorAction {
    /// Run the supervisor in the foreground
    Live,
    /// Run the supervisor in the background
    Daemon,
    /// Stop a running supervisor
    Stop,
    /// Show supervisor and pipeline status
    Status,
    /// One supervised cycle (exit 1 on high or critical findings)
    Check,
    /// Regenerate and print the dashboard
    Dashboard,
    /// Rotate logs, prune recovery points, remove stale locks
    Cleanup,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Reset to defaults
    Reset,
}
