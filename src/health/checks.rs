//! Individual health checks. Each is a pure function over already-collected
//! inputs, so the monitor owns all I/O.

use chrono::{DateTime, Utc};
use regex::RegexSet;

use super::types::{Connectivity, Finding, FindingKind, ResourceSnapshot, Severity};
use crate::config::HealthConfig;
use crate::state::{ExecutionState, PipelineStatus, TaskStatus};
use crate::utils::{format_duration_secs, truncate_chars};

fn secs_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(earlier).num_seconds()
}

/// Tasks in progress for longer than the timeout threshold.
pub fn check_stalled_tasks(
    state: &ExecutionState,
    now: DateTime<Utc>,
    config: &HealthConfig,
) -> Vec<Finding> {
    let threshold = config.task_timeout_threshold_secs as i64;

    state
        .ordered_tasks()
        .into_iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .filter_map(|task| {
            let started = task.started_at?;
            let running = secs_between(started, now);
            (running > threshold).then(|| {
                Finding::new(
                    FindingKind::TaskStalled,
                    Severity::High,
                    format!(
                        "Task {} in progress for {} (threshold {})",
                        task.id,
                        format_duration_secs(running),
                        format_duration_secs(threshold)
                    ),
                )
                .with_task(&task.id)
            })
        })
        .collect()
}

/// The state document has not been touched for too long while the pipeline runs.
pub fn check_state_staleness(
    state: &ExecutionState,
    now: DateTime<Utc>,
    config: &HealthConfig,
) -> Option<Finding> {
    if state.status != PipelineStatus::Running {
        return None;
    }
    let idle = secs_between(state.last_updated_at, now);
    let threshold = config.task_timeout_threshold_secs as i64;
    if idle <= threshold {
        return None;
    }

    let mut finding = Finding::new(
        FindingKind::StateStale,
        Severity::High,
        format!(
            "State not updated for {} while RUNNING (threshold {})",
            format_duration_secs(idle),
            format_duration_secs(threshold)
        ),
    );
    if let Some(task) = state.current_task()
        && task.status == TaskStatus::InProgress
    {
        finding = finding.with_task(&task.id);
    }
    Some(finding)
}

pub fn check_error_rate(recent_errors: usize, config: &HealthConfig) -> Option<Finding> {
    (recent_errors > config.api_error_threshold).then(|| {
        Finding::new(
            FindingKind::ErrorRateHigh,
            Severity::Medium,
            format!(
                "{} classified failures in the last {} (threshold {})",
                recent_errors,
                format_duration_secs(config.error_window_secs as i64),
                config.api_error_threshold
            ),
        )
    })
}

pub fn check_connectivity(connectivity: &Connectivity, config: &HealthConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !connectivity.network_reachable {
        findings.push(Finding::new(
            FindingKind::NetworkDown,
            Severity::Medium,
            format!("Network probe {} unreachable", config.network_probe),
        ));
    }
    if !connectivity.agent_api_reachable {
        findings.push(Finding::new(
            FindingKind::AgentApiUnreachable,
            Severity::Medium,
            format!("Agent API {} unreachable", config.agent_api_probe),
        ));
    }
    findings
}

pub fn check_resources(snapshot: &ResourceSnapshot, config: &HealthConfig) -> Option<Finding> {
    let mut pressures = Vec::new();

    if let Some(disk) = snapshot.disk_usage_percent
        && disk > config.disk_usage_threshold
    {
        pressures.push(format!("disk {:.1}% > {:.0}%", disk, config.disk_usage_threshold));
    }
    if let Some(mem) = snapshot.memory_usage_percent
        && mem > config.memory_usage_threshold
    {
        pressures.push(format!("memory {:.1}% > {:.0}%", mem, config.memory_usage_threshold));
    }
    if let Some(load) = snapshot.load_per_core()
        && load > config.load_per_core_threshold
    {
        pressures.push(format!(
            "load {:.2}/core > {:.2}",
            load, config.load_per_core_threshold
        ));
    }

    (!pressures.is_empty()).then(|| {
        Finding::new(
            FindingKind::ResourcePressure,
            Severity::Medium,
            format!("Resource pressure: {}", pressures.join(", ")),
        )
    })
}

pub fn check_progress_rate(
    state: &ExecutionState,
    now: DateTime<Utc>,
    config: &HealthConfig,
) -> Option<Finding> {
    if state.status.is_terminal() {
        return None;
    }
    let started = state.started_at?;
    let elapsed = secs_between(started, now);
    if elapsed <= config.slow_progress_after_secs as i64 {
        return None;
    }
    let ratio = state.progress_ratio();
    (ratio < config.slow_progress_ratio).then(|| {
        Finding::new(
            FindingKind::ProgressSlow,
            Severity::Low,
            format!(
                "Only {}% complete after {}",
                state.progress_percent(),
                format_duration_secs(elapsed)
            ),
        )
    })
}

/// Case-insensitive fatal patterns compiled once per monitor.
pub fn compile_fatal_patterns(patterns: &[String]) -> Result<RegexSet, regex::Error> {
    regex::RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
}

pub fn check_fatal_patterns(
    lines: &[String],
    patterns: &RegexSet,
    current_task: Option<&str>,
) -> Option<Finding> {
    let line = lines.iter().find(|l| patterns.is_match(l))?;
    let mut finding = Finding::new(
        FindingKind::FatalPattern,
        Severity::Critical,
        format!(
            "Unrecoverable agent output: {}",
            truncate_chars(line.trim(), 200)
        ),
    );
    if let Some(task_id) = current_task {
        finding = finding.with_task(task_id);
    }
    Some(finding)
}
