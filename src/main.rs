use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use claude_warden::cli::{
    Cli, Commands, ConfigAction, Display, HealthAction, MonitorAction, OutputFormat,
    RecoverAction, RecoveryChoice, RecoveryMenu, RetryAction, StateAction,
};
use claude_warden::config::{ProjectPaths, WardenConfig};
use claude_warden::error::{Result, WardenError};
use claude_warden::health::HealthCheckResult;
use claude_warden::recovery::{
    ErrorLog, ErrorLogEntry, RecoveryPointManager, classify, verify_artifacts,
};
use claude_warden::report::RecoveryReportInput;
use claude_warden::state::{ExecutionState, StateStore, Task};
use claude_warden::supervisor::{
    AutoRecovery, MonitorMode, Supervisor, SupervisorLock, Warden, spawn_daemon,
};
use claude_warden::utils::rotate_file;

/// Context for command output handling.
struct OutputContext {
    display: Display,
    format: OutputFormat,
    root: PathBuf,
    verbose: bool,
}

impl OutputContext {
    fn is_text(&self) -> bool {
        self.format == OutputFormat::Text
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("claude_warden=debug")
    } else {
        EnvFilter::new("claude_warden=info")
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let root = match cli.project {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let out = OutputContext {
        display: Display::new(),
        format: cli.output,
        root,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Init { force } => cmd_init(&out, force).await,
        Commands::State { action } => cmd_state(&out, action).await,
        Commands::Retry { action } => cmd_retry(&out, action).await,
        Commands::Health { action } => cmd_health(&out, action).await,
        Commands::Recover { action } => cmd_recover(&out, action).await,
        Commands::Monitor { action } => cmd_monitor(&out, action).await,
        Commands::Config { action } => cmd_config(&out, action).await,
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn initialized_paths(root: &std::path::Path) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root.to_path_buf());
    if !paths.is_initialized() {
        return Err(WardenError::NotInitialized);
    }
    Ok(paths)
}

async fn open_supervisor(out: &OutputContext) -> Result<Supervisor> {
    let warden = Warden::open(out.root.clone()).await?;
    Ok(Supervisor::new(Arc::new(warden)))
}

async fn cmd_init(out: &OutputContext, force: bool) -> Result<ExitCode> {
    let paths = ProjectPaths::new(out.root.clone());
    let config_path = paths.warden_dir.join("config.toml");
    let existed = config_path.exists();

    paths.ensure_dirs().await?;
    if !existed || force {
        WardenConfig::default().save(&paths.warden_dir).await?;
    }

    if out.is_text() {
        if existed && !force {
            out.display
                .print_warning("claude-warden is already initialized in this project.");
        } else {
            out.display.print_success("Initialized claude-warden.");
            out.display
                .print_info(&format!("Configuration: {}", config_path.display()));
            out.display
                .print_info(&format!("State: {}", paths.state_file.display()));
        }
    } else {
        out.json(&json!({
            "initialized": true,
            "alreadyInitialized": existed && !force,
            "wardenDir": paths.warden_dir,
        }))?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_state(out: &OutputContext, action: StateAction) -> Result<ExitCode> {
    let paths = initialized_paths(&out.root)?;
    let config = WardenConfig::load(&paths.warden_dir).await?;
    let store = StateStore::open(&paths.state_file)?;
    let checkpoint = |task_id: String, reason: &'static str| {
        let recovery = RecoveryPointManager::new(
            &paths.recovery_dir,
            store.clone(),
            config.recovery.max_recovery_points,
        );
        async move {
            if let Err(e) = recovery.create(Some(&task_id), reason).await {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to create recovery point");
            }
        }
    };

    let state = match action {
        StateAction::Show => store.read()?,
        StateAction::Init { tasks, from, force } => {
            let tasks: Vec<Task> = match from {
                Some(file) => {
                    let content = tokio::fs::read_to_string(&file).await?;
                    serde_json::from_str(&content)?
                }
                None => tasks.into_iter().map(Task::new).collect(),
            };
            if tasks.is_empty() {
                return Err(WardenError::Other(
                    "at least one task is required".to_string(),
                ));
            }
            store.initialize(ExecutionState::new(tasks), force)?
        }
        StateAction::Start { task_id } => {
            let state = store.update(|state| state.start_task(&task_id, Utc::now()))?;
            if config.recovery.checkpoint_on_task_events {
                checkpoint(task_id, "task started").await;
            }
            state
        }
        StateAction::Complete { task_id } => {
            let state = store.update(|state| state.complete_task(&task_id, Utc::now()))?;
            if config.recovery.checkpoint_on_task_events {
                checkpoint(task_id, "task completed").await;
            }
            state
        }
        StateAction::Fail { task_id, error } => {
            let state = store.update(|state| state.fail_task(&task_id, &error, Utc::now()))?;
            ErrorLog::new(paths.error_log())
                .append(&ErrorLogEntry::new(&task_id, classify(&error), &error))?;
            state
        }
        StateAction::Block { task_id, reason } => {
            store.update(|state| state.block_task(&task_id, &reason))?
        }
    };

    if out.is_text() {
        out.display.print_state(&state);
    } else {
        out.json(&state)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_retry(out: &OutputContext, action: RetryAction) -> Result<ExitCode> {
    let supervisor = open_supervisor(out).await?;
    let warden = supervisor.warden();

    match action {
        RetryAction::Monitor => {
            let _signals = warden.stop.install_os_handlers();
            if out.is_text() {
                out.display
                    .print_info("Retry monitor running (Ctrl-C to stop)");
            }
            supervisor
                .run_retry_monitor(|task_id, outcome| {
                    if out.is_text() {
                        out.display.print_retry_outcome(task_id, outcome);
                    } else {
                        println!(
                            "{}",
                            json!({ "taskId": task_id, "outcome": outcome.as_str(), "detail": outcome.to_string() })
                        );
                    }
                })
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        RetryAction::Task { task_id, error } => {
            let state = warden.store.read()?;
            let task = state.require_task(&task_id)?;
            let (kind, error) = match error {
                Some(text) => (classify(&text), text),
                None => match warden.error_log.last_for_task(&task_id)? {
                    Some(entry) => (entry.kind, entry.message),
                    None => {
                        let text = task.last_error.clone().unwrap_or_default();
                        (classify(&text), text)
                    }
                },
            };

            let _signals = warden.stop.install_os_handlers();
            let spinner = out
                .is_text()
                .then(|| out.display.create_spinner(&format!("Retrying {} ({})", task_id, kind)));
            let outcome = warden.scheduler.attempt_retry(&task_id, kind, &error).await;
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let outcome = outcome?;

            if out.is_text() {
                out.display.print_retry_outcome(&task_id, &outcome);
            } else {
                out.json(&json!({
                    "taskId": task_id,
                    "kind": kind,
                    "outcome": outcome.as_str(),
                    "detail": outcome.to_string(),
                }))?;
            }
            Ok(exit_code(outcome.is_success()))
        }
        RetryAction::Stats => {
            let stats = warden.scheduler.stats()?;
            if out.is_text() {
                out.display.print_retry_stats(&stats);
            } else {
                out.json(&stats)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        RetryAction::Prune { keep } => {
            let removed = warden.error_log.prune(keep)?;
            if out.is_text() {
                out.display
                    .print_success(&format!("Removed {} error log entries", removed));
            } else {
                out.json(&json!({ "removed": removed, "kept": keep }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_health(out: &OutputContext, result: &HealthCheckResult) -> Result<()> {
    if out.is_text() {
        out.display.print_health(result);
        Ok(())
    } else {
        out.json(result)
    }
}

async fn cmd_health(out: &OutputContext, action: HealthAction) -> Result<ExitCode> {
    let supervisor = open_supervisor(out).await?;
    let warden = supervisor.warden();

    match action {
        HealthAction::Check => {
            let result = warden.monitor.check_once().await;
            print_health(out, &result)?;
            Ok(exit_code(result.is_healthy()))
        }
        HealthAction::Watch => {
            let _signals = warden.stop.install_os_handlers();
            supervisor
                .run(MonitorMode::Observe, |outcome| {
                    if let Err(e) = print_health(out, &outcome.result) {
                        out.display.print_error(&e.to_string());
                    }
                })
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        HealthAction::Report => {
            let result = warden.monitor.check_once().await;
            let report = warden
                .reporter
                .build_status(result, &warden.store.read());
            warden.reporter.write_status(&report).await?;
            if out.is_text() {
                println!("{}", report.to_markdown());
                out.display.print_info(&format!(
                    "Written to {}",
                    warden.reporter.status_md_path().display()
                ));
            } else {
                out.json(&report)?;
            }
            Ok(exit_code(report.is_healthy()))
        }
    }
}

fn print_auto_recovery(out: &OutputContext, report: &AutoRecovery) -> Result<bool> {
    let ok = report.outcomes.iter().all(|(_, o)| o.is_success());
    if out.is_text() {
        if let Some(id) = &report.restored_from {
            out.display
                .print_warning(&format!("Corrupt state restored from {}", id));
        }
        if report.outcomes.is_empty() {
            out.display.print_info("No failed task eligible for retry");
        }
        for (task_id, outcome) in &report.outcomes {
            out.display.print_retry_outcome(task_id, outcome);
        }
    } else {
        let outcomes: Vec<_> = report
            .outcomes
            .iter()
            .map(|(task_id, o)| {
                json!({ "taskId": task_id, "outcome": o.as_str(), "detail": o.to_string() })
            })
            .collect();
        out.json(&json!({
            "restoredFrom": report.restored_from,
            "outcomes": outcomes,
        }))?;
    }
    Ok(ok)
}

async fn continue_task(
    out: &OutputContext,
    supervisor: &Supervisor,
    task_id: Option<&str>,
) -> Result<bool> {
    let spinner = out
        .is_text()
        .then(|| out.display.create_spinner("Agent is continuing the task"));
    let result = supervisor.continue_task(task_id).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let (task_id, output) = result?;

    if out.is_text() {
        if output.success {
            out.display.print_success(&format!("{} completed", task_id));
        } else {
            out.display.print_error(&format!(
                "{} failed again: {}",
                task_id,
                claude_warden::utils::truncate_chars(output.error_text().trim(), 300)
            ));
        }
    } else {
        out.json(&json!({
            "taskId": task_id,
            "success": output.success,
            "exitCode": output.exit_code,
            "timedOut": output.timed_out,
            "durationSecs": output.duration.as_secs(),
        }))?;
    }
    Ok(output.success)
}

async fn write_recovery_report(out: &OutputContext, warden: &Warden) -> Result<()> {
    let state = warden.store.read().ok();
    let points = warden.recovery.list(10).await.unwrap_or_default();
    let stats = warden.scheduler.stats().ok();
    let alerts = warden.reporter.recent_alerts();

    let path = warden
        .reporter
        .write_recovery_report(&RecoveryReportInput {
            generated_at: Utc::now(),
            state: state.as_ref(),
            points: &points,
            stats: stats.as_ref(),
            alerts: &alerts,
        })
        .await?;

    if out.is_text() {
        out.display
            .print_success(&format!("Recovery report written to {}", path.display()));
    } else {
        out.json(&json!({ "path": path }))?;
    }
    Ok(())
}

async fn cmd_recover(out: &OutputContext, action: RecoverAction) -> Result<ExitCode> {
    let supervisor = open_supervisor(out).await?;
    let warden = supervisor.warden();

    match action {
        RecoverAction::Auto => {
            let _signals = warden.stop.install_os_handlers();
            let report = supervisor.auto_recover().await?;
            let ok = print_auto_recovery(out, &report)?;
            Ok(exit_code(ok))
        }
        RecoverAction::Interactive => {
            let state = warden.store.read().ok();
            let points = warden.recovery.list(20).await?;
            let choice = RecoveryMenu::new().prompt(state.as_ref(), &points)?;

            let ok = match choice {
                RecoveryChoice::Continue(task_id) => {
                    continue_task(out, &supervisor, Some(&task_id)).await?
                }
                RecoveryChoice::RetryFailed => {
                    let report = supervisor.auto_recover().await?;
                    print_auto_recovery(out, &report)?
                }
                RecoveryChoice::Restore(id) => {
                    let state = warden.recovery.restore(&id).await?;
                    out.display.print_success(&format!("Restored {}", id));
                    out.display.print_state(&state);
                    true
                }
                RecoveryChoice::Verify(task_id) => {
                    let state = warden.store.read()?;
                    let report = verify_artifacts(&warden.paths.root, state.require_task(&task_id)?);
                    out.display.print_artifact_report(&report);
                    report.is_complete()
                }
                RecoveryChoice::WriteReport => {
                    write_recovery_report(out, warden).await?;
                    true
                }
                RecoveryChoice::Quit => true,
            };
            Ok(exit_code(ok))
        }
        RecoverAction::Continue { task_id } => {
            let ok = continue_task(out, &supervisor, task_id.as_deref()).await?;
            Ok(exit_code(ok))
        }
        RecoverAction::Restore { id } => {
            let state = warden.recovery.restore(&id).await?;
            if out.is_text() {
                out.display.print_success(&format!("Restored {}", id));
                out.display.print_state(&state);
            } else {
                out.json(&state)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        RecoverAction::Verify { task_id } => {
            let state = warden.store.read()?;
            let report = verify_artifacts(&warden.paths.root, state.require_task(&task_id)?);
            if out.is_text() {
                out.display.print_artifact_report(&report);
            } else {
                out.json(&report)?;
            }
            Ok(exit_code(report.is_complete()))
        }
        RecoverAction::List { limit } => {
            let points = warden.recovery.list(limit).await?;
            if out.is_text() {
                out.display.print_header("Recovery Points");
                out.display.print_recovery_points(&points);
            } else {
                out.json(&points)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        RecoverAction::Report => {
            write_recovery_report(out, warden).await?;
            Ok(ExitCode::SUCCESS)
        }
        RecoverAction::Prune { keep } => {
            let keep = keep.unwrap_or(warden.config.recovery.max_recovery_points);
            let removed = warden.recovery.prune(keep).await?;
            if out.is_text() {
                out.display
                    .print_success(&format!("Removed {} recovery points", removed));
            } else {
                out.json(&json!({ "removed": removed, "kept": keep }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_monitor(out: &OutputContext, action: MonitorAction) -> Result<ExitCode> {
    let paths = initialized_paths(&out.root)?;
    let lock = SupervisorLock::new(&paths.locks_dir);

    match action {
        MonitorAction::Live => {
            let supervisor = open_supervisor(out).await?;
            let _guard = lock.acquire().await?;
            let _signals = supervisor.warden().stop.install_os_handlers();
            if out.is_text() {
                out.display
                    .print_info("Supervisor running (Ctrl-C to stop)");
            }
            supervisor
                .run(MonitorMode::Supervise, |outcome| {
                    if !out.is_text() {
                        if let Err(e) = out.json(&outcome.result) {
                            out.display.print_error(&e.to_string());
                        }
                        return;
                    }
                    if let Some(id) = &outcome.restored_from {
                        out.display
                            .print_warning(&format!("Corrupt state restored from {}", id));
                    }
                    for job in &outcome.forwarded {
                        out.display
                            .print_info(&format!("Queued retry of {} ({})", job.task_id, job.kind));
                    }
                    if !outcome.result.findings.is_empty() {
                        out.display.print_health(&outcome.result);
                    }
                })
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        MonitorAction::Daemon => {
            if let Some(holder) = lock.holder().await? {
                return Err(WardenError::DaemonAlreadyRunning { pid: holder.pid });
            }
            let log = paths.supervisor_log();
            let pid = spawn_daemon(&paths.root, &log, out.verbose)?;
            if out.is_text() {
                out.display
                    .print_success(&format!("Supervisor started (PID {})", pid));
                out.display.print_info(&format!("Log: {}", log.display()));
            } else {
                out.json(&json!({ "pid": pid, "log": log }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        MonitorAction::Stop => {
            let stopped = lock.request_stop().await?;
            if out.is_text() {
                match stopped {
                    Some(pid) => out
                        .display
                        .print_success(&format!("Sent stop to supervisor (PID {})", pid)),
                    None => out.display.print_info("Supervisor not running"),
                }
            } else {
                out.json(&json!({ "stopped": stopped }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        MonitorAction::Status => {
            let holder = lock.holder().await?;
            let supervisor = open_supervisor(out).await?;
            let state = supervisor.warden().store.read();
            let last = supervisor.warden().reporter.read_status().await?;

            if out.is_text() {
                out.display.print_lock(holder.as_ref());
                match &state {
                    Ok(s) => out.display.print_state(s),
                    Err(e) => out.display.print_warning(&e.to_string()),
                }
                if let Some(report) = &last {
                    out.display.print_health(&report.health);
                    out.display.print_alerts(&report.recent_alerts);
                }
            } else {
                out.json(&json!({
                    "supervisor": holder,
                    "state": state.as_ref().ok(),
                    "stateError": state.as_ref().err().map(|e| e.to_string()),
                    "lastReport": last,
                }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        MonitorAction::Check => {
            let supervisor = open_supervisor(out).await?;
            let outcome = supervisor.run_cycle(MonitorMode::Supervise, None).await?;
            if let Some(id) = &outcome.restored_from
                && out.is_text()
            {
                out.display
                    .print_warning(&format!("Corrupt state restored from {}", id));
            }
            print_health(out, &outcome.result)?;
            Ok(exit_code(outcome.result.is_healthy()))
        }
        MonitorAction::Dashboard => {
            let supervisor = open_supervisor(out).await?;
            let warden = supervisor.warden();
            let result = warden.monitor.check_once().await;
            let report = warden.reporter.build_status(result, &warden.store.read());
            warden.reporter.write_status(&report).await?;
            if out.is_text() {
                println!("{}", report.to_markdown());
            } else {
                out.json(&report)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        MonitorAction::Cleanup => {
            let config = WardenConfig::load(&paths.warden_dir).await?;
            let mut rotated = Vec::new();
            for log in [paths.agent_log(), paths.supervisor_log()] {
                if rotate_file(
                    &log,
                    config.report.max_log_bytes,
                    config.report.keep_rotated_logs,
                )? {
                    rotated.push(log);
                }
            }

            let supervisor = open_supervisor(out).await?;
            let pruned = supervisor
                .warden()
                .recovery
                .prune(config.recovery.max_recovery_points)
                .await?;
            let stale_lock = lock.remove_if_stale().await?;

            if out.is_text() {
                for log in &rotated {
                    out.display.print_info(&format!("Rotated {}", log.display()));
                }
                out.display
                    .print_info(&format!("Pruned {} recovery points", pruned));
                if stale_lock {
                    out.display.print_info("Removed stale supervisor lock");
                }
                out.display.print_success("Cleanup complete");
            } else {
                out.json(&json!({
                    "rotated": rotated,
                    "prunedRecoveryPoints": pruned,
                    "removedStaleLock": stale_lock,
                }))?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_config(out: &OutputContext, action: ConfigAction) -> Result<ExitCode> {
    let paths = initialized_paths(&out.root)?;

    match action {
        ConfigAction::Show => {
            let config = WardenConfig::load(&paths.warden_dir).await?;
            if out.is_text() {
                let text = toml::to_string_pretty(&config)
                    .map_err(|e| WardenError::Config(e.to_string()))?;
                println!("{}", text);
            } else {
                out.json(&config)?;
            }
        }
        ConfigAction::Reset => {
            WardenConfig::default().save(&paths.warden_dir).await?;
            if out.is_text() {
                out.display
                    .print_success("Configuration reset to defaults.");
            } else {
                out.json(&json!({ "reset": true }))?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
