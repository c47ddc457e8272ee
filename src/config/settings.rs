use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, WardenError};

pub const WARDEN_DIR: &str = ".warden";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub health: HealthConfig,
    pub agent: AgentConfig,
    pub report: ReportConfig,
    pub notification: NotificationConfig,
}

impl WardenConfig {
    pub async fn load(warden_dir: &Path) -> Result<Self> {
        let config_path = warden_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, warden_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = warden_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| WardenError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        let r = &self.retry;
        if r.max_total_retries == 0 {
            errors.push("retry.max_total_retries must be greater than 0");
        }
        if r.max_retry_per_task == 0 {
            errors.push("retry.max_retry_per_task must be greater than 0");
        }
        if r.max_retry_per_task > r.max_total_retries {
            errors.push("retry.max_retry_per_task must be <= retry.max_total_retries");
        }
        if r.base_delay_secs > r.max_delay_secs {
            errors.push("retry.base_delay_secs must be <= retry.max_delay_secs");
        }

        let h = &self.health;
        if h.interval_secs == 0 {
            errors.push("health.interval_secs must be greater than 0");
        }
        if h.task_timeout_threshold_secs == 0 {
            errors.push("health.task_timeout_threshold_secs must be greater than 0");
        }
        if h.probe_timeout_secs == 0 {
            errors.push("health.probe_timeout_secs must be greater than 0");
        }
        if h.probe_timeout_secs >= h.interval_secs {
            errors.push("health.probe_timeout_secs must be shorter than health.interval_secs");
        }
        if !(0.0..=100.0).contains(&h.disk_usage_threshold) {
            errors.push("health.disk_usage_threshold must be between 0 and 100");
        }
        if !(0.0..=100.0).contains(&h.memory_usage_threshold) {
            errors.push("health.memory_usage_threshold must be between 0 and 100");
        }
        if h.load_per_core_threshold <= 0.0 {
            errors.push("health.load_per_core_threshold must be positive");
        }
        if !(0.0..=1.0).contains(&h.slow_progress_ratio) {
            errors.push("health.slow_progress_ratio must be between 0.0 and 1.0");
        }
        if h.error_window_secs == 0 {
            errors.push("health.error_window_secs must be greater than 0");
        }
        if let Err(e) = regex::RegexSet::new(&h.fatal_patterns) {
            tracing::debug!(error = %e, "Invalid fatal pattern");
            errors.push("health.fatal_patterns must all be valid regular expressions");
        }

        if self.agent.command.trim().is_empty() {
            errors.push("agent.command must not be empty");
        }
        if self.agent.timeout_secs == 0 {
            errors.push("agent.timeout_secs must be greater than 0");
        }

        if self.report.retain_alerts == 0 {
            errors.push("report.retain_alerts must be greater than 0");
        }
        if self.report.max_alert_bytes == 0 {
            errors.push("report.max_alert_bytes must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_total_retries: u32,
    pub max_retry_per_task: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_total_retries: 10,
            max_retry_per_task: 3,
            base_delay_secs: 30,
            max_delay_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum number of recovery points kept on disk (FIFO eviction).
    pub max_recovery_points: usize,
    /// Create a recovery point whenever a task starts or completes.
    pub checkpoint_on_task_events: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_points: 20,
            checkpoint_on_task_events: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub task_timeout_threshold_secs: u64,
    pub api_error_threshold: usize,
    /// Window in which classified failures count toward the error rate.
    pub error_window_secs: u64,
    pub probe_timeout_secs: u64,
    /// `host:port` used to test general connectivity.
    pub network_probe: String,
    /// `host:port` of the agent's API endpoint.
    pub agent_api_probe: String,
    pub disk_usage_threshold: f64,
    pub memory_usage_threshold: f64,
    pub load_per_core_threshold: f64,
    pub slow_progress_after_secs: u64,
    pub slow_progress_ratio: f64,
    /// Regular expressions (case-insensitive) marking unrecoverable agent output.
    pub fatal_patterns: Vec<String>,
    /// Lines of the agent log scanned for fatal patterns and included in reports.
    pub log_tail_lines: usize,
    /// Hand high-severity findings to the retry worker automatically.
    pub auto_retry: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            task_timeout_threshold_secs: 1800,
            api_error_threshold: 5,
            error_window_secs: 1800,
            probe_timeout_secs: 5,
            network_probe: "1.1.1.1:443".to_string(),
            agent_api_probe: "api.anthropic.com:443".to_string(),
            disk_usage_threshold: 90.0,
            memory_usage_threshold: 90.0,
            load_per_core_threshold: 2.0,
            slow_progress_after_secs: 7200,
            slow_progress_ratio: 0.2,
            fatal_patterns: default_fatal_patterns(),
            log_tail_lines: 200,
            auto_retry: true,
        }
    }
}

fn default_fatal_patterns() -> Vec<String> {
    [
        r"segmentation fault",
        r"core dumped",
        r"panicked at",
        r"fatal error:",
        r"permission denied",
        r"command not found",
        r"no such file or directory.*(claude|node)",
        r"out of memory",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable of the external agent.
    pub command: String,
    /// Arguments placed before the instruction.
    pub args: Vec<String>,
    /// Hard timeout for one agent invocation.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Alert history is rotated once it grows beyond this size.
    pub max_alert_bytes: u64,
    /// Entries kept when the alert history is rotated.
    pub retain_alerts: usize,
    /// Alerts included in generated reports.
    pub recent_alerts: usize,
    /// Log files larger than this are rotated by `monitor cleanup`.
    pub max_log_bytes: u64,
    /// Rotated log generations kept.
    pub keep_rotated_logs: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_alert_bytes: 1024 * 1024,
            retain_alerts: 500,
            recent_alerts: 20,
            max_log_bytes: 10 * 1024 * 1024,
            keep_rotated_logs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub desktop: bool,
    pub hook_command: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: false,
            hook_command: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub warden_dir: PathBuf,
    pub state_file: PathBuf,
    pub recovery_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub locks_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: PathBuf) -> Self {
        let warden_dir = root.join(WARDEN_DIR);

        Self {
            state_file: warden_dir.join("state.json"),
            recovery_dir: warden_dir.join("recovery"),
            logs_dir: warden_dir.join("logs"),
            reports_dir: warden_dir.join("reports"),
            locks_dir: warden_dir.join("locks"),
            warden_dir,
            root,
        }
    }

    pub fn agent_log(&self) -> PathBuf {
        self.logs_dir.join("agent.log")
    }

    pub fn error_log(&self) -> PathBuf {
        self.logs_dir.join("errors.jsonl")
    }

    pub fn alert_log(&self) -> PathBuf {
        self.logs_dir.join("alerts.jsonl")
    }

    /// Output of a backgrounded supervisor.
    pub fn supervisor_log(&self) -> PathBuf {
        self.logs_dir.join("supervisor.log")
    }

    pub fn is_initialized(&self) -> bool {
        self.warden_dir.exists()
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            &self.warden_dir,
            &self.recovery_dir,
            &self.logs_dir,
            &self.reports_dir,
            &self.locks_dir,
        ];

        for dir in dirs {
            fs::create_dir_all(dir).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(WardenConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_accumulates_errors() {
        let mut config = WardenConfig::default();
        config.retry.max_total_retries = 0;
        config.health.interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_total_retries"));
        assert!(err.contains("interval_secs"));
    }

    #[test]
    fn test_invalid_fatal_pattern_rejected() {
        let mut config = WardenConfig::default();
        config.health.fatal_patterns = vec!["(unclosed".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_project_paths_layout() {
        let paths = ProjectPaths::new(PathBuf::from("/project"));
        assert_eq!(paths.state_file, PathBuf::from("/project/.warden/state.json"));
        assert_eq!(paths.agent_log(), PathBuf::from("/project/.warden/logs/agent.log"));
        assert_eq!(paths.recovery_dir, PathBuf::from("/project/.warden/recovery"));
    }
}
