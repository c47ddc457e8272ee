use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::health::{HealthCheckResult, Severity};
use crate::notification::Alert;
use crate::recovery::{ArtifactReport, RecoveryPointSummary, RetryOutcome, RetryStats};
use crate::state::{ExecutionState, PipelineStatus, TaskStatus};
use crate::supervisor::LockInfo;
use crate::utils::{format_duration_secs, truncate_chars};

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
        println!();
    }

    pub fn print_state(&self, state: &ExecutionState) {
        self.print_header("Pipeline");

        println!(
            "Status:   {}",
            self.pipeline_style(state.status)
                .apply_to(state.status.to_string())
        );
        println!(
            "Progress: {} {}% ({}/{}, {} failed)",
            self.progress_bar(state.progress_percent(), 30),
            state.progress_percent(),
            state.completed_tasks,
            state.total_tasks,
            state.failed_tasks
        );
        println!(
            "Current:  {}",
            state.current_task_id.as_deref().unwrap_or("-")
        );
        println!("Retries:  {}", state.retry_info.total_retries);
        if let Some(started) = state.started_at {
            println!(
                "{}",
                style(format!("Started:  {}", started.format("%Y-%m-%d %H:%M:%S"))).dim()
            );
        }
        println!(
            "{}",
            style(format!(
                "Updated:  {}",
                state.last_updated_at.format("%Y-%m-%d %H:%M:%S")
            ))
            .dim()
        );
        println!();

        println!(
            "{:<16} {:<12} {:<8} {}",
            style("Task").bold(),
            style("Status").bold(),
            style("Retries").bold(),
            style("Note").bold()
        );
        println!("{}", style("─".repeat(65)).dim());
        for task in state.ordered_tasks() {
            let note = task
                .last_error
                .as_deref()
                .or(task.title.as_deref())
                .map(|s| truncate_chars(s, 40))
                .unwrap_or_default();
            println!(
                "{:<16} {:<12} {:<8} {}",
                truncate_chars(&task.id, 15),
                self.task_style(task.status).apply_to(task.status.to_string()),
                state.retries_for(&task.id),
                style(note).dim()
            );
        }
    }

    pub fn print_health(&self, result: &HealthCheckResult) {
        self.print_header("Health");

        if let Some(r) = &result.resources {
            let pct = |v: Option<f64>| v.map_or("n/a".to_string(), |v| format!("{:.1}%", v));
            println!(
                "Disk: {}  Memory: {}  Load/core: {}",
                pct(r.disk_usage_percent),
                pct(r.memory_usage_percent),
                r.load_per_core()
                    .map_or("n/a".to_string(), |l| format!("{:.2}", l))
            );
        }
        if let Some(c) = &result.connectivity {
            let mark = |ok: bool| {
                if ok {
                    style("ok").green()
                } else {
                    style("DOWN").red().bold()
                }
            };
            println!(
                "Network: {}  Agent API: {}",
                mark(c.network_reachable),
                mark(c.agent_api_reachable)
            );
        }
        println!();

        if result.findings.is_empty() {
            self.print_success("No findings");
            return;
        }
        for f in &result.findings {
            let task = f
                .task_id
                .as_deref()
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default();
            println!(
                "{} {:<8} {}{} {}",
                f.severity.icon(),
                self.severity_style(f.severity).apply_to(f.severity.as_str()),
                style(f.kind.as_str()).bold(),
                style(task).cyan(),
                f.message
            );
        }
    }

    pub fn print_retry_stats(&self, stats: &RetryStats) {
        self.print_header("Retries");
        println!(
            "Total: {}/{} ({} remaining)  Per task cap: {}",
            stats.total_retries,
            stats.max_total_retries,
            stats.remaining_total(),
            stats.max_retry_per_task
        );
        println!();

        if stats.records.is_empty() {
            println!("{}", style("No retries recorded.").dim());
            return;
        }

        println!(
            "{:<16} {:<12} {:<9} {:<20} {}",
            style("Task").bold(),
            style("Status").bold(),
            style("Attempts").bold(),
            style("Last kind").bold(),
            style("Next eligible").bold()
        );
        println!("{}", style("─".repeat(80)).dim());
        for r in &stats.records {
            println!(
                "{:<16} {:<12} {:<9} {:<20} {}",
                truncate_chars(&r.task_id, 15),
                self.task_style(r.status).apply_to(r.status.to_string()),
                r.attempt_count,
                r.last_error_kind.map(|k| k.as_str()).unwrap_or("-"),
                r.next_eligible_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "manual".to_string())
            );
        }
    }

    pub fn print_retry_outcome(&self, task_id: &str, outcome: &RetryOutcome) {
        match outcome {
            RetryOutcome::RetriedSuccess => {
                self.print_success(&format!("{}: {}", task_id, outcome))
            }
            RetryOutcome::RetriedFailure { error, .. } => {
                self.print_warning(&format!("{}: {}", task_id, outcome));
                println!("  {}", style(truncate_chars(error.trim(), 300)).dim());
            }
            RetryOutcome::Refused(_) => self.print_error(&format!("{}: {}", task_id, outcome)),
        }
    }

    pub fn print_recovery_points(&self, points: &[RecoveryPointSummary]) {
        if points.is_empty() {
            println!("{}", style("No recovery points.").dim());
            return;
        }

        println!(
            "{:<28} {:<12} {:<12} {:<8} {}",
            style("ID").bold(),
            style("Status").bold(),
            style("Task").bold(),
            style("Done").bold(),
            style("Reason").bold()
        );
        println!("{}", style("─".repeat(80)).dim());
        for p in points {
            println!(
                "{:<28} {:<12} {:<12} {:<8} {}",
                p.id,
                self.pipeline_style(p.status).apply_to(p.status.to_string()),
                p.associated_task_id.as_deref().unwrap_or("-"),
                format!("{}/{}", p.completed_tasks, p.total_tasks),
                truncate_chars(&p.reason, 30)
            );
        }
    }

    pub fn print_artifact_report(&self, report: &ArtifactReport) {
        self.print_header(&format!("Artifacts: {}", report.task_id));
        if report.expected() == 0 {
            println!("{}", style("No expected artifacts declared.").dim());
            return;
        }
        for a in &report.present {
            println!("  {} {}", style("✓").green(), a);
        }
        for a in &report.empty {
            println!("  {} {} {}", style("~").yellow(), a, style("(empty)").dim());
        }
        for a in &report.missing {
            println!("  {} {} {}", style("✗").red(), a, style("(missing)").dim());
        }
    }

    pub fn print_alerts(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        println!("{}", style("Recent alerts:").bold());
        for a in alerts {
            println!(
                "  {} {} {} {}",
                style(a.timestamp.format("%m-%d %H:%M:%S")).dim(),
                a.kind.emoji(),
                self.severity_style(a.severity).apply_to(a.severity.as_str()),
                truncate_chars(&a.message, 100)
            );
        }
    }

    pub fn print_lock(&self, holder: Option<&LockInfo>) {
        match holder {
            Some(lock) => {
                let uptime = chrono::Utc::now()
                    .signed_duration_since(lock.started_at)
                    .num_seconds();
                self.print_success(&format!(
                    "Supervisor running (PID {}, up {}, last heartbeat {})",
                    lock.pid,
                    format_duration_secs(uptime),
                    lock.last_heartbeat.format("%H:%M:%S")
                ));
            }
            None => self.print_info("Supervisor not running"),
        }
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", style("✓").green().bold(), message);
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red().bold(), message);
    }

    pub fn print_warning(&self, message: &str) {
        println!("{} {}", style("!").yellow().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", style("→").cyan(), message);
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")
        {
            pb.set_style(spinner_style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        pb
    }

    fn pipeline_style(&self, status: PipelineStatus) -> Style {
        match status {
            PipelineStatus::NotStarted => Style::new().dim(),
            PipelineStatus::Running => Style::new().yellow().bold(),
            PipelineStatus::Recovering => Style::new().magenta(),
            PipelineStatus::Continuing => Style::new().cyan(),
            PipelineStatus::Completed => Style::new().green(),
            PipelineStatus::Failed => Style::new().red().bold(),
        }
    }

    fn task_style(&self, status: TaskStatus) -> Style {
        match status {
            TaskStatus::Pending => Style::new().dim(),
            TaskStatus::InProgress => Style::new().yellow(),
            TaskStatus::Completed => Style::new().green(),
            TaskStatus::Failed => Style::new().red().bold(),
            TaskStatus::Blocked => Style::new().magenta(),
        }
    }

    fn severity_style(&self, severity: Severity) -> Style {
        match severity {
            Severity::Low => Style::new().dim(),
            Severity::Medium => Style::new().yellow(),
            Severity::High => Style::new().red(),
            Severity::Critical => Style::new().red().bold().underlined(),
        }
    }

    fn progress_bar(&self, percentage: u8, width: usize) -> String {
        let filled = (width as f64 * percentage as f64 / 100.0) as usize;
        let empty = width.saturating_sub(filled);

        format!(
            "{}{}",
            style("█".repeat(filled)).green(),
            style("░".repeat(empty)).dim()
        )
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
