//! Status dashboard and recovery report generation.

mod recovery_report;
mod status;

pub use recovery_report::{RecoveryReportInput, render_recovery_report};
pub use status::{StateSummary, StatusReport};

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{ProjectPaths, ReportConfig};
use crate::error::Result;
use crate::health::HealthCheckResult;
use crate::notification::AlertHistory;
use crate::state::ExecutionState;
use crate::utils::{tail_lines, write_atomic_async};

pub const STATUS_JSON: &str = "status.json";
pub const STATUS_MD: &str = "status.md";
pub const RECOVERY_REPORT_MD: &str = "recovery-report.md";

pub struct Reporter {
    paths: ProjectPaths,
    config: ReportConfig,
    log_tail_lines: usize,
    history: AlertHistory,
}

impl Reporter {
    pub fn new(
        paths: ProjectPaths,
        config: ReportConfig,
        log_tail_lines: usize,
        history: AlertHistory,
    ) -> Self {
        Self {
            paths,
            config,
            log_tail_lines,
            history,
        }
    }

    pub fn status_json_path(&self) -> PathBuf {
        self.paths.reports_dir.join(STATUS_JSON)
    }

    pub fn status_md_path(&self) -> PathBuf {
        self.paths.reports_dir.join(STATUS_MD)
    }

    pub fn recovery_report_path(&self) -> PathBuf {
        self.paths.reports_dir.join(RECOVERY_REPORT_MD)
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn recent_alerts(&self) -> Vec<crate::notification::Alert> {
        self.history
            .recent(self.config.recent_alerts)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read alert history");
                Vec::new()
            })
    }

    /// Aggregate a status report. Missing inputs degrade the report instead
    /// of failing it.
    pub fn build_status(
        &self,
        health: HealthCheckResult,
        state: &Result<ExecutionState>,
    ) -> StatusReport {
        let (summary, state_error) = match state {
            Ok(s) => (Some(StateSummary::from(s)), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let log_tail = tail_lines(&self.paths.agent_log(), self.log_tail_lines).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read agent log tail");
            Vec::new()
        });

        StatusReport {
            generated_at: Utc::now(),
            project_root: self.paths.root.display().to_string(),
            state: summary,
            state_error,
            health,
            log_tail,
            recent_alerts: self.recent_alerts(),
        }
    }

    /// Writes `status.json` and `status.md`, each by atomic rename.
    pub async fn write_status(&self, report: &StatusReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.paths.reports_dir).await?;
        let json = serde_json::to_vec_pretty(report)?;
        write_atomic_async(&self.status_json_path(), &json).await?;
        write_atomic_async(&self.status_md_path(), report.to_markdown().as_bytes()).await?;
        debug!(findings = report.health.findings.len(), "Status report written");
        Ok(())
    }

    /// Last written status report, if any.
    pub async fn read_status(&self) -> Result<Option<StatusReport>> {
        match tokio::fs::read_to_string(self.status_json_path()).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_recovery_report(&self, input: &RecoveryReportInput<'_>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.paths.reports_dir).await?;
        let path = self.recovery_report_path();
        write_atomic_async(&path, render_recovery_report(input).as_bytes()).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WardenError;
    use tempfile::TempDir;

    fn reporter(dir: &TempDir) -> Reporter {
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        let config = ReportConfig::default();
        let history = AlertHistory::new(paths.alert_log(), config.max_alert_bytes, 10);
        Reporter::new(paths, config, 50, history)
    }

    #[tokio::test]
    async fn test_write_and_read_status() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir);
        let report = reporter.build_status(
            HealthCheckResult::new(Utc::now()),
            &Err(WardenError::StateNotInitialized),
        );
        assert!(report.state_error.is_some());

        reporter.write_status(&report).await.unwrap();
        assert!(reporter.status_md_path().exists());

        let loaded = reporter.read_status().await.unwrap().unwrap();
        assert_eq!(loaded, report);
    }

    #[tokio::test]
    async fn test_read_status_missing() {
        let dir = TempDir::new().unwrap();
        assert!(reporter(&dir).read_status().await.unwrap().is_none());
    }
}
