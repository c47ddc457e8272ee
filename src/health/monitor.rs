use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use regex::RegexSet;
use tracing::{debug, warn};

use super::checks;
use super::probes::SystemProbe;
use super::types::{Finding, FindingKind, HealthCheckResult, Severity};
use crate::config::HealthConfig;
use crate::error::WardenError;
use crate::recovery::{ErrorKind, ErrorLog};
use crate::state::{ExecutionState, StateStore};
use crate::utils::tail_lines;

const MAX_SCAN_BYTES: u64 = 512 * 1024;

/// A failure fabricated from a finding, handed to the retry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticFailure {
    pub task_id: String,
    pub kind: ErrorKind,
    pub source: FindingKind,
    pub message: String,
}

/// Runs every check once per call. Holds the agent-log read offset so a
/// long-running monitor reports each fatal line only once.
pub struct HealthMonitor {
    config: HealthConfig,
    project_root: PathBuf,
    agent_log: PathBuf,
    store: StateStore,
    error_log: ErrorLog,
    probe: Arc<dyn SystemProbe>,
    fatal_patterns: Option<RegexSet>,
    log_offset: Mutex<Option<u64>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        project_root: impl Into<PathBuf>,
        agent_log: impl Into<PathBuf>,
        store: StateStore,
        error_log: ErrorLog,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        let fatal_patterns = match checks::compile_fatal_patterns(&config.fatal_patterns) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(error = %e, "Invalid fatal pattern, fatal-pattern check disabled");
                None
            }
        };

        Self {
            config,
            project_root: project_root.into(),
            agent_log: agent_log.into(),
            store,
            error_log,
            probe,
            fatal_patterns,
            log_offset: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs.max(1))
    }

    /// One full check cycle. Local faults become findings; this never fails.
    pub async fn check_once(&self) -> HealthCheckResult {
        let now = Utc::now();
        let mut result = HealthCheckResult::new(now);

        let timeout = Duration::from_secs(self.config.probe_timeout_secs.max(1));
        let (resources, connectivity) = tokio::join!(
            self.probe.resources(&self.project_root),
            self.probe.connectivity(
                &self.config.network_probe,
                &self.config.agent_api_probe,
                timeout
            )
        );

        let state = self.read_state(&mut result.findings);
        if let Some(state) = &state {
            result
                .findings
                .extend(checks::check_stalled_tasks(state, now, &self.config));
            result
                .findings
                .extend(checks::check_state_staleness(state, now, &self.config));
            result
                .findings
                .extend(checks::check_progress_rate(state, now, &self.config));
        }

        let window_start = now - chrono::Duration::seconds(self.config.error_window_secs as i64);
        match self.error_log.count_since(window_start) {
            Ok(count) => result
                .findings
                .extend(checks::check_error_rate(count, &self.config)),
            Err(e) => result.findings.push(check_failed("error log", &e)),
        }

        result
            .findings
            .extend(checks::check_connectivity(&connectivity, &self.config));
        result
            .findings
            .extend(checks::check_resources(&resources, &self.config));

        if let Some(patterns) = &self.fatal_patterns {
            match self.scan_agent_log() {
                Ok(lines) => {
                    let current = state.as_ref().and_then(|s| s.current_task_id.as_deref());
                    result
                        .findings
                        .extend(checks::check_fatal_patterns(&lines, patterns, current));
                }
                Err(e) => result.findings.push(check_failed("agent log", &e)),
            }
        }

        result.resources = Some(resources);
        result.connectivity = Some(connectivity);

        debug!(
            findings = result.findings.len(),
            worst = ?result.worst_severity(),
            "Health check complete"
        );
        result
    }

    fn read_state(&self, findings: &mut Vec<Finding>) -> Option<ExecutionState> {
        match self.store.read() {
            Ok(state) => Some(state),
            Err(WardenError::StateNotInitialized) => None,
            Err(WardenError::CorruptState { path, reason }) => {
                findings.push(Finding::new(
                    FindingKind::StateCorrupt,
                    Severity::Critical,
                    format!("State file {} unreadable: {}", path.display(), reason),
                ));
                None
            }
            Err(e) => {
                findings.push(check_failed("state", &e));
                None
            }
        }
    }

    /// Agent log lines not yet scanned. The first call looks at the configured
    /// tail; later calls only read bytes appended since. A shrunk file is
    /// treated as rotated and read from the start.
    fn scan_agent_log(&self) -> std::io::Result<Vec<String>> {
        let mut offset = self.log_offset.lock();

        let len = match std::fs::metadata(&self.agent_log) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *offset = Some(0);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let lines = match *offset {
            None => tail_lines(&self.agent_log, self.config.log_tail_lines)
                .map_err(|e| std::io::Error::other(e.to_string()))?,
            Some(prev) => {
                let start = if prev > len { 0 } else { prev };
                read_from(&self.agent_log, start.max(len.saturating_sub(MAX_SCAN_BYTES)))?
            }
        };

        *offset = Some(len);
        Ok(lines)
    }

    /// Findings that should be turned into retries: high or critical, naming a
    /// task, and not a fatal pattern. One per task.
    pub fn synthetic_failures(result: &HealthCheckResult) -> Vec<SyntheticFailure> {
        let mut failures: Vec<SyntheticFailure> = Vec::new();

        for finding in &result.findings {
            if finding.severity < Severity::High
                || matches!(
                    finding.kind,
                    FindingKind::FatalPattern | FindingKind::StateCorrupt
                )
            {
                continue;
            }
            let Some(task_id) = &finding.task_id else {
                continue;
            };
            if failures.iter().any(|f| &f.task_id == task_id) {
                continue;
            }
            failures.push(SyntheticFailure {
                task_id: task_id.clone(),
                kind: finding.kind.synthetic_error_kind(),
                source: finding.kind,
                message: format!("{}: {}", finding.kind, finding.message),
            });
        }

        failures
    }

    /// Findings that go to an operator instead of the retry worker.
    pub fn escalations(result: &HealthCheckResult) -> Vec<&Finding> {
        result
            .findings
            .iter()
            .filter(|f| {
                matches!(
                    f.kind,
                    FindingKind::FatalPattern | FindingKind::StateCorrupt
                ) || (f.severity >= Severity::High && f.task_id.is_none())
            })
            .collect()
    }
}

fn check_failed(what: &str, err: &dyn std::fmt::Display) -> Finding {
    Finding::new(
        FindingKind::CheckFailed,
        Severity::Low,
        format!("Could not check {}: {}", what, err),
    )
}

fn read_from(path: &Path, start: u64) -> std::io::Result<Vec<String>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf)
        .lines()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Connectivity, ResourceSnapshot};
    use crate::recovery::ErrorLogEntry;
    use crate::state::Task;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FakeProbe {
        reachable: bool,
    }

    #[async_trait]
    impl SystemProbe for FakeProbe {
        async fn resources(&self, _path: &Path) -> ResourceSnapshot {
            ResourceSnapshot {
                disk_usage_percent: Some(10.0),
                memory_usage_percent: Some(10.0),
                load_average: Some(0.1),
                cpu_count: 2,
            }
        }

        async fn reachable(&self, _target: &str, _timeout: Duration) -> bool {
            self.reachable
        }
    }

    struct Fixture {
        _dir: TempDir,
        monitor: HealthMonitor,
        store: StateStore,
        log: PathBuf,
        errors: ErrorLog,
    }

    fn fixture(reachable: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        let log = dir.path().join("agent.log");
        let errors = ErrorLog::new(dir.path().join("errors.jsonl"));
        let monitor = HealthMonitor::new(
            HealthConfig::default(),
            dir.path(),
            &log,
            store.clone(),
            errors.clone(),
            Arc::new(FakeProbe { reachable }),
        );
        Fixture {
            _dir: dir,
            monitor,
            store,
            log,
            errors,
        }
    }

    fn stalled_state() -> ExecutionState {
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(3000);
        let mut state =
            ExecutionState::new(vec![Task::new("T1"), Task::new("T2"), Task::new("T3")]);
        state.start_task("T1", old).unwrap();
        state.complete_task("T1", old).unwrap();
        state.start_task("T2", old).unwrap();
        state.complete_task("T2", old).unwrap();
        state.start_task("T3", old).unwrap();
        state
    }

    #[tokio::test]
    async fn test_uninitialized_project_is_healthy() {
        let fx = fixture(true);
        let result = fx.monitor.check_once().await;
        assert!(result.findings.is_empty(), "{:?}", result.findings);
        assert_eq!(
            result.connectivity,
            Some(Connectivity {
                network_reachable: true,
                agent_api_reachable: true
            })
        );
    }

    #[tokio::test]
    async fn test_stalled_task_forwarded_as_timeout() {
        let fx = fixture(true);
        fx.store.initialize(stalled_state(), false).unwrap();

        let result = fx.monitor.check_once().await;
        assert!(result.has(FindingKind::TaskStalled));

        let failures = HealthMonitor::synthetic_failures(&result);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task_id, "T3");
        assert_eq!(failures[0].kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_connectivity_findings_not_forwarded() {
        let fx = fixture(false);
        let result = fx.monitor.check_once().await;
        assert!(result.has(FindingKind::NetworkDown));
        assert!(result.has(FindingKind::AgentApiUnreachable));
        assert!(HealthMonitor::synthetic_failures(&result).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_critical_finding() {
        let fx = fixture(true);
        std::fs::write(fx.store.path(), "{ not json").unwrap();

        let result = fx.monitor.check_once().await;
        assert!(result.has(FindingKind::StateCorrupt));
        assert_eq!(result.worst_severity(), Some(Severity::Critical));
        assert_eq!(HealthMonitor::escalations(&result).len(), 1);
    }

    #[tokio::test]
    async fn test_error_rate_counts_recent_entries() {
        let fx = fixture(true);
        for _ in 0..6 {
            fx.errors
                .append(&ErrorLogEntry::new("T1", ErrorKind::ApiError, "rate limit"))
                .unwrap();
        }
        let result = fx.monitor.check_once().await;
        assert!(result.has(FindingKind::ErrorRateHigh));
    }

    #[tokio::test]
    async fn test_fatal_line_reported_once() {
        let fx = fixture(true);
        fx.store.initialize(stalled_state(), false).unwrap();
        std::fs::write(&fx.log, "starting\nSegmentation fault (core dumped)\n").unwrap();

        let first = fx.monitor.check_once().await;
        let fatal: Vec<_> = first
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::FatalPattern)
            .collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].task_id.as_deref(), Some("T3"));

        let second = fx.monitor.check_once().await;
        assert!(!second.has(FindingKind::FatalPattern));

        crate::utils::append_line(&fx.log, "thread 'main' panicked at lib.rs:1").unwrap();
        let third = fx.monitor.check_once().await;
        assert!(third.has(FindingKind::FatalPattern));
    }

    #[test]
    fn test_synthetic_failures_dedup_by_task() {
        let mut result = HealthCheckResult::new(Utc::now());
        result.findings.push(
            Finding::new(FindingKind::TaskStalled, Severity::High, "stalled").with_task("T3"),
        );
        result.findings.push(
            Finding::new(FindingKind::StateStale, Severity::High, "stale").with_task("T3"),
        );
        result.findings.push(
            Finding::new(FindingKind::FatalPattern, Severity::Critical, "panic").with_task("T2"),
        );
        result
            .findings
            .push(Finding::new(FindingKind::ProgressSlow, Severity::Low, "slow").with_task("T1"));

        let failures = HealthMonitor::synthetic_failures(&result);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, FindingKind::TaskStalled);
    }
}
