use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{Result, WardenError};
use crate::utils::truncate_with_marker;

/// Exit code reported when the supervisor kills an agent at its hard timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl AgentOutput {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Best available description of why the run failed.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            let tail: Vec<&str> = stdout.lines().rev().take(20).collect();
            return tail.into_iter().rev().collect::<Vec<_>>().join("\n");
        }
        match self.exit_code {
            Some(code) => format!("agent exited with status {}", code),
            None => "agent terminated by signal".to_string(),
        }
    }
}

/// Boundary to the external agent doing the actual task work.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, task_id: &str, instruction: &str) -> Result<AgentOutput>;
}

/// Runs the configured agent CLI as a subprocess with a hard timeout.
pub struct ClaudeCliInvoker {
    config: AgentConfig,
    project_root: PathBuf,
    state_file: PathBuf,
    agent_log: PathBuf,
}

impl ClaudeCliInvoker {
    pub fn new(
        config: AgentConfig,
        project_root: impl Into<PathBuf>,
        state_file: impl Into<PathBuf>,
        agent_log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            state_file: state_file.into(),
            agent_log: agent_log.into(),
        }
    }

    async fn append_log(&self, task_id: &str, output: &AgentOutput) {
        let mut entry = format!(
            "==== [{}] task={} exit={} duration={}s{} ====\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            task_id,
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.duration.as_secs(),
            if output.timed_out { " TIMEOUT" } else { "" }
        );
        if !output.stdout.is_empty() {
            entry.push_str(&output.stdout);
            if !output.stdout.ends_with('\n') {
                entry.push('\n');
            }
        }
        if !output.stderr.is_empty() {
            entry.push_str("---- stderr ----\n");
            entry.push_str(&output.stderr);
            if !output.stderr.ends_with('\n') {
                entry.push('\n');
            }
        }

        if let Some(parent) = self.agent_log.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(error = %e, "Failed to create logs directory");
            return;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.agent_log)
            .await
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    warn!(error = %e, "Failed to write agent log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %self.agent_log.display(), "Failed to open agent log");
            }
        }
    }

    fn working_dir(&self) -> &Path {
        &self.project_root
    }
}

#[async_trait]
impl AgentInvoker for ClaudeCliInvoker {
    async fn invoke(&self, task_id: &str, instruction: &str) -> Result<AgentOutput> {
        debug!(
            command = %self.config.command,
            task_id,
            dir = %self.working_dir().display(),
            "Invoking agent"
        );

        let child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(instruction)
            .current_dir(self.working_dir())
            .env("WARDEN_STATE_FILE", &self.state_file)
            .env("WARDEN_TASK_ID", task_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    WardenError::AgentNotFound(self.config.command.clone())
                } else {
                    WardenError::Agent(format!("failed to spawn {}: {}", self.config.command, e))
                }
            })?;

        let started = Instant::now();
        let limit = Duration::from_secs(self.config.timeout_secs);

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => {
                let raw = result?;
                AgentOutput {
                    success: raw.status.success(),
                    exit_code: raw.status.code(),
                    stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
                    timed_out: false,
                    duration: started.elapsed(),
                }
            }
            Err(_) => {
                warn!(task_id, timeout_secs = self.config.timeout_secs, "Agent hit hard timeout, killed");
                AgentOutput {
                    success: false,
                    exit_code: Some(TIMEOUT_EXIT_CODE),
                    stdout: String::new(),
                    stderr: format!("agent timed out after {}s", self.config.timeout_secs),
                    timed_out: true,
                    duration: started.elapsed(),
                }
            }
        };

        self.append_log(task_id, &output).await;

        info!(
            task_id,
            success = output.success,
            exit_code = ?output.exit_code,
            duration_secs = output.duration.as_secs(),
            "Agent finished"
        );
        if !output.success {
            debug!(stderr = %truncate_with_marker(&output.stderr, 500), "Agent stderr");
        }

        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invoker(dir: &TempDir, command: &str, args: &[&str], timeout_secs: u64) -> ClaudeCliInvoker {
        ClaudeCliInvoker::new(
            AgentConfig {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                timeout_secs,
            },
            dir.path(),
            dir.path().join("state.json"),
            dir.path().join("logs/agent.log"),
        )
    }

    #[tokio::test]
    async fn test_successful_run_is_logged() {
        let dir = TempDir::new().unwrap();
        let agent = invoker(&dir, "sh", &["-c", "echo \"ran $WARDEN_TASK_ID\"", "sh"], 10);

        let output = agent.invoke("T1", "instruction").await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "ran T1");

        let log = std::fs::read_to_string(dir.path().join("logs/agent.log")).unwrap();
        assert!(log.contains("task=T1 exit=0"));
        assert!(log.contains("ran T1"));
    }

    #[tokio::test]
    async fn test_failure_exposes_stderr() {
        let dir = TempDir::new().unwrap();
        let agent = invoker(&dir, "sh", &["-c", "echo 'rate limit exceeded' >&2; exit 3", "sh"], 10);

        let output = agent.invoke("T2", "go").await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.error_text(), "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_hard_timeout_kills_agent() {
        let dir = TempDir::new().unwrap();
        let agent = invoker(&dir, "sleep", &[], 1);

        let output = agent.invoke("T3", "30").await.unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert!(output.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let dir = TempDir::new().unwrap();
        let agent = invoker(&dir, "definitely-not-a-real-agent-binary", &[], 5);
        assert!(matches!(
            agent.invoke("T1", "x").await,
            Err(WardenError::AgentNotFound(_))
        ));
    }

    #[test]
    fn test_error_text_fallbacks() {
        assert_eq!(AgentOutput::failed(2, "").error_text(), "agent exited with status 2");
        let mut out = AgentOutput::failed(1, "");
        out.stdout = "line1\nfatal: boom\n".into();
        assert!(out.error_text().ends_with("fatal: boom"));
    }
}
