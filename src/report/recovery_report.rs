use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::notification::{Alert, manual_options};
use crate::recovery::{RecoveryPointSummary, RetryStats};
use crate::state::{ExecutionState, TaskStatus};
use crate::utils::truncate_chars;

/// Inputs for `recovery-report.md`. Anything that could not be loaded is
/// simply left out of the document.
pub struct RecoveryReportInput<'a> {
    pub generated_at: DateTime<Utc>,
    pub state: Option<&'a ExecutionState>,
    pub points: &'a [RecoveryPointSummary],
    pub stats: Option<&'a RetryStats>,
    pub alerts: &'a [Alert],
}

pub fn render_recovery_report(input: &RecoveryReportInput<'_>) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Claude-Warden Recovery Report\n");
    let _ = writeln!(md, "Generated: {}\n", input.generated_at.to_rfc3339());

    md.push_str("## Pipeline\n\n");
    let implied = match input.state {
        Some(state) => {
            let _ = writeln!(
                md,
                "- Status: {}\n- Progress: {}% ({}/{})\n- Current task: {}",
                state.status,
                state.progress_percent(),
                state.completed_tasks,
                state.total_tasks,
                state.current_task_id.as_deref().unwrap_or("-")
            );
            state.implied_task().map(|t| t.id.clone())
        }
        None => {
            md.push_str("State unavailable.\n");
            None
        }
    };

    md.push_str("\n## Failed / Blocked Tasks\n\n");
    let troubled: Vec<_> = input
        .state
        .map(|s| {
            s.ordered_tasks()
                .into_iter()
                .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
                .collect()
        })
        .unwrap_or_default();
    if troubled.is_empty() {
        md.push_str("None.\n");
    }
    for task in troubled {
        let _ = writeln!(
            md,
            "- **{}** ({}): {}",
            task.id,
            task.status,
            task.last_error
                .as_deref()
                .map(|e| truncate_chars(e, 200))
                .unwrap_or_else(|| "no error recorded".to_string())
        );
    }

    if let Some(stats) = input.stats {
        md.push_str("\n## Retries\n\n");
        let _ = writeln!(
            md,
            "Total {}/{} (per task cap {})\n",
            stats.total_retries, stats.max_total_retries, stats.max_retry_per_task
        );
        if !stats.records.is_empty() {
            md.push_str("| Task | Status | Attempts | Last kind | Next eligible |\n|---|---|---|---|---|\n");
            for r in &stats.records {
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} | {} |",
                    r.task_id,
                    r.status,
                    r.attempt_count,
                    r.last_error_kind.map(|k| k.as_str()).unwrap_or("-"),
                    r.next_eligible_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "manual".to_string())
                );
            }
        }
    }

    md.push_str("\n## Recovery Points\n\n");
    if input.points.is_empty() {
        md.push_str("None.\n");
    }
    for p in input.points {
        let _ = writeln!(
            md,
            "- `{}` {} task={} {}/{} done: {}",
            p.id,
            p.status,
            p.associated_task_id.as_deref().unwrap_or("-"),
            p.completed_tasks,
            p.total_tasks,
            p.reason
        );
    }

    if !input.alerts.is_empty() {
        md.push_str("\n## Recent Alerts\n\n");
        for a in input.alerts {
            let _ = writeln!(
                md,
                "- {} [{}] {}: {}",
                a.timestamp.format("%Y-%m-%d %H:%M:%S"),
                a.severity,
                a.kind.as_str(),
                truncate_chars(&a.message, 200)
            );
        }
    }

    md.push_str("\n## Manual Options\n\n");
    for option in manual_options(implied.as_deref()) {
        let _ = writeln!(md, "- `{}`", option);
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Task;

    #[test]
    fn test_lists_failed_tasks_and_options() {
        let now = Utc::now();
        let mut state = ExecutionState::new(vec![Task::new("T1"), Task::new("T2")]);
        state.start_task("T1", now).unwrap();
        state.fail_task("T1", "permission denied: /etc", now).unwrap();

        let md = render_recovery_report(&RecoveryReportInput {
            generated_at: now,
            state: Some(&state),
            points: &[],
            stats: None,
            alerts: &[],
        });

        assert!(md.contains("**T1** (FAILED): permission denied"));
        assert!(md.contains("claude-warden recover continue T1"));
        assert!(md.contains("## Recovery Points\n\nNone."));
    }

    #[test]
    fn test_without_state() {
        let md = render_recovery_report(&RecoveryReportInput {
            generated_at: Utc::now(),
            state: None,
            points: &[],
            stats: None,
            alerts: &[],
        });
        assert!(md.contains("State unavailable."));
        assert!(md.contains("recover continue <TASK>"));
    }
}
