use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{HealthCheckResult, Severity};
use crate::notification::Alert;
use crate::state::{ExecutionState, PipelineStatus};
use crate::utils::{format_duration_secs, truncate_chars};

/// Lines of the agent log rendered into the Markdown dashboard.
const DASHBOARD_LOG_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub status: PipelineStatus,
    pub progress_percent: u8,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
    pub current_task_id: Option<String>,
    pub total_retries: u32,
    pub per_task_retries: BTreeMap<String, u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl From<&ExecutionState> for StateSummary {
    fn from(state: &ExecutionState) -> Self {
        Self {
            status: state.status,
            progress_percent: state.progress_percent(),
            completed_tasks: state.completed_tasks,
            failed_tasks: state.failed_tasks,
            total_tasks: state.total_tasks,
            current_task_id: state.current_task_id.clone(),
            total_retries: state.retry_info.total_retries,
            per_task_retries: state.retry_info.per_task_retries.clone(),
            started_at: state.started_at,
            last_updated_at: state.last_updated_at,
        }
    }
}

/// Everything an operator needs at a glance, regenerated every monitor cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub project_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSummary>,
    /// Why no state summary is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
    pub health: HealthCheckResult,
    #[serde(default)]
    pub log_tail: Vec<String>,
    #[serde(default)]
    pub recent_alerts: Vec<Alert>,
}

impl StatusReport {
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Claude-Warden Status\n");
        let _ = writeln!(md, "- Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(md, "- Project: `{}`", self.project_root);
        let verdict = if self.is_healthy() {
            "✓ healthy"
        } else {
            "✗ attention needed"
        };
        let _ = writeln!(md, "- Health: {}\n", verdict);

        md.push_str("## Pipeline\n\n");
        match (&self.state, &self.state_error) {
            (Some(s), _) => {
                let _ = writeln!(md, "| Field | Value |\n|---|---|");
                let _ = writeln!(md, "| Status | {} |", s.status);
                let _ = writeln!(
                    md,
                    "| Progress | {}% ({}/{} completed, {} failed) |",
                    s.progress_percent, s.completed_tasks, s.total_tasks, s.failed_tasks
                );
                let _ = writeln!(
                    md,
                    "| Current task | {} |",
                    s.current_task_id.as_deref().unwrap_or("-")
                );
                let _ = writeln!(md, "| Total retries | {} |", s.total_retries);
                if let Some(started) = s.started_at {
                    let elapsed = self
                        .generated_at
                        .signed_duration_since(started)
                        .num_seconds();
                    let _ = writeln!(md, "| Elapsed | {} |", format_duration_secs(elapsed));
                }
                let _ = writeln!(md, "| Last update | {} |", s.last_updated_at.to_rfc3339());
                if !s.per_task_retries.is_empty() {
                    md.push_str("\nRetries per task:\n\n");
                    for (task, count) in &s.per_task_retries {
                        let _ = writeln!(md, "- {}: {}", task, count);
                    }
                }
            }
            (None, Some(err)) => {
                let _ = writeln!(md, "State unavailable: {}", err);
            }
            (None, None) => md.push_str("State not initialized.\n"),
        }

        md.push_str("\n## Host\n\n");
        if let Some(r) = &self.health.resources {
            let pct = |v: Option<f64>| v.map_or("n/a".to_string(), |v| format!("{:.1}%", v));
            let _ = writeln!(md, "- Disk: {}", pct(r.disk_usage_percent));
            let _ = writeln!(md, "- Memory: {}", pct(r.memory_usage_percent));
            let _ = writeln!(
                md,
                "- Load/core: {}",
                r.load_per_core()
                    .map_or("n/a".to_string(), |l| format!("{:.2}", l))
            );
        }
        if let Some(c) = &self.health.connectivity {
            let mark = |ok: bool| if ok { "reachable" } else { "UNREACHABLE" };
            let _ = writeln!(md, "- Network: {}", mark(c.network_reachable));
            let _ = writeln!(md, "- Agent API: {}", mark(c.agent_api_reachable));
        }

        md.push_str("\n## Findings\n\n");
        if self.health.findings.is_empty() {
            md.push_str("None.\n");
        }
        for f in &self.health.findings {
            let task = f
                .task_id
                .as_deref()
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default();
            let _ = writeln!(
                md,
                "- {} **{}** `{}`{}: {}",
                f.severity.icon(),
                f.severity,
                f.kind,
                task,
                f.message
            );
        }

        if !self.recent_alerts.is_empty() {
            md.push_str("\n## Recent Alerts\n\n");
            for alert in &self.recent_alerts {
                let _ = writeln!(
                    md,
                    "- {} {} {}: {}",
                    alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    alert.kind.emoji(),
                    alert.severity,
                    truncate_chars(&alert.message, 160)
                );
            }
        }

        if !self.log_tail.is_empty() {
            md.push_str("\n## Agent Log (tail)\n\n```\n");
            let skip = self.log_tail.len().saturating_sub(DASHBOARD_LOG_LINES);
            for line in &self.log_tail[skip..] {
                md.push_str(line);
                md.push('\n');
            }
            md.push_str("```\n");
        }

        md
    }

    /// Findings at or above `min` severity.
    pub fn findings_at_least(&self, min: Severity) -> usize {
        self.health
            .findings
            .iter()
            .filter(|f| f.severity >= min)
            .count()
    }
}
