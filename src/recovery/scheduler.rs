//! Retry decisions, backoff, and agent re-invocation for failed tasks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backoff::backoff_delay;
use super::checkpoint::RecoveryPointManager;
use super::classifier::{ErrorKind, classify, classify_exit};
use super::error_log::{ErrorLog, ErrorLogEntry};
use crate::agent::{AgentInvoker, AgentOutput, PromptBuilder};
use crate::config::RetryConfig;
use crate::error::{Result, WardenError};
use crate::health::Severity;
use crate::notification::{Alert, AlertKind, Alerter};
use crate::state::{ExecutionState, PipelineStatus, StateStore, TaskStatus};
use crate::utils::{single_line, truncate_chars};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefusalReason {
    TotalCeiling { limit: u32 },
    TaskCeiling { limit: u32 },
    NotRetryable(ErrorKind),
    TaskCompleted,
}

impl RefusalReason {
    pub fn is_ceiling(&self) -> bool {
        matches!(self, Self::TotalCeiling { .. } | Self::TaskCeiling { .. })
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TotalCeiling { limit } => {
                write!(f, "pipeline retry ceiling reached ({} total)", limit)
            }
            Self::TaskCeiling { limit } => write!(f, "task retry ceiling reached ({})", limit),
            Self::NotRetryable(kind) => {
                write!(f, "{} requires human action: {}", kind, kind.operator_hint())
            }
            Self::TaskCompleted => write!(f, "task is already completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    RetriedSuccess,
    RetriedFailure { kind: ErrorKind, error: String },
    Refused(RefusalReason),
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriedSuccess => "RETRIED_SUCCESS",
            Self::RetriedFailure { .. } => "RETRIED_FAILURE",
            Self::Refused(_) => "REFUSED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::RetriedSuccess)
    }
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriedSuccess => f.write_str("RETRIED_SUCCESS"),
            Self::RetriedFailure { kind, .. } => write!(f, "RETRIED_FAILURE ({})", kind),
            Self::Refused(reason) => write!(f, "REFUSED ({})", reason),
        }
    }
}

/// Ordered retry policy. `None` means the retry is allowed.
pub fn evaluate_retry(
    state: &ExecutionState,
    task_id: &str,
    kind: ErrorKind,
    config: &RetryConfig,
) -> Option<RefusalReason> {
    if state.retry_info.total_retries >= config.max_total_retries {
        return Some(RefusalReason::TotalCeiling {
            limit: config.max_total_retries,
        });
    }
    if state.retries_for(task_id) >= config.max_retry_per_task {
        return Some(RefusalReason::TaskCeiling {
            limit: config.max_retry_per_task,
        });
    }
    if !kind.is_retryable() {
        return Some(RefusalReason::NotRetryable(kind));
    }
    if state
        .task(task_id)
        .is_some_and(|t| t.status == TaskStatus::Completed)
    {
        return Some(RefusalReason::TaskCompleted);
    }
    None
}

/// Derived per-task retry view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub last_error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
    /// `None` when no further automatic retry is possible.
    pub next_eligible_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    pub total_retries: u32,
    pub max_total_retries: u32,
    pub max_retry_per_task: u32,
    pub records: Vec<RetryRecord>,
}

impl RetryStats {
    pub fn remaining_total(&self) -> u32 {
        self.max_total_retries.saturating_sub(self.total_retries)
    }
}

/// A failed task the supervisor should pass to `attempt_retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCandidate {
    pub task_id: String,
    pub kind: ErrorKind,
    pub error: String,
    /// Set when a ceiling will refuse the attempt; it then only records the
    /// refusal.
    pub exhausted: Option<RefusalReason>,
}

enum Decision {
    Accepted { attempt: u32 },
    Refused(RefusalReason),
}

pub struct RetryScheduler {
    config: RetryConfig,
    store: StateStore,
    recovery: Arc<RecoveryPointManager>,
    agent: Arc<dyn AgentInvoker>,
    prompts: PromptBuilder,
    error_log: ErrorLog,
    alerter: Alerter,
    stop: watch::Receiver<bool>,
}

impl RetryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RetryConfig,
        store: StateStore,
        recovery: Arc<RecoveryPointManager>,
        agent: Arc<dyn AgentInvoker>,
        prompts: PromptBuilder,
        error_log: ErrorLog,
        alerter: Alerter,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            recovery,
            agent,
            prompts,
            error_log,
            alerter,
            stop,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Decide, wait out backoff, and re-invoke the agent for `task_id`.
    pub async fn attempt_retry(
        &self,
        task_id: &str,
        kind: ErrorKind,
        error_text: &str,
    ) -> Result<RetryOutcome> {
        let config = self.config.clone();
        let error_text = error_text.trim().to_string();

        // Checks run again inside the locked mutator so concurrent callers
        // cannot push counters past the ceilings.
        let (_, decision) = self.store.update_with(|state| {
            state.require_task(task_id)?;

            if let Some(reason) = evaluate_retry(state, task_id, kind, &config) {
                if let Some(task) = state.task(task_id)
                    && task.status.can_transition_to(TaskStatus::Failed)
                    && task.status != TaskStatus::Failed
                {
                    let note = if error_text.is_empty() {
                        reason.to_string()
                    } else {
                        error_text.clone()
                    };
                    state.fail_task(task_id, &note, Utc::now())?;
                }
                if reason != RefusalReason::TaskCompleted {
                    state.fail_pipeline_if_current(task_id);
                }
                return Ok(Decision::Refused(reason));
            }

            let attempt = state.retries_for(task_id);
            state.retry_info.total_retries += 1;
            *state
                .retry_info
                .per_task_retries
                .entry(task_id.to_string())
                .or_insert(0) += 1;

            state.reset_task(task_id)?;
            if !error_text.is_empty()
                && let Some(task) = state.tasks.get_mut(task_id)
            {
                task.last_error = Some(error_text.clone());
            }
            state.status = PipelineStatus::Recovering;
            Ok(Decision::Accepted { attempt })
        })?;

        let attempt = match decision {
            Decision::Refused(reason) => {
                self.raise_refusal(task_id, kind, &reason, &error_text).await;
                return Ok(RetryOutcome::Refused(reason));
            }
            Decision::Accepted { attempt } => attempt,
        };

        let attempt_no = attempt + 1;
        let reason = format!(
            "before retry {}/{} ({})",
            attempt_no, self.config.max_retry_per_task, kind
        );
        if let Err(e) = self.recovery.create(Some(task_id), &reason).await {
            warn!(task_id, error = %e, "Failed to create recovery point before retry");
        }

        let delay = backoff_delay(&self.config, attempt);
        info!(
            task_id,
            kind = %kind,
            attempt = attempt_no,
            delay_secs = delay.as_secs(),
            "Retry accepted, backing off"
        );
        if let Err(e) = self.wait_backoff(delay).await {
            self.release_aborted(task_id, &error_text);
            return Err(e);
        }

        let state = self.store.update(|state| {
            state.start_task(task_id, Utc::now())?;
            state.status = PipelineStatus::Continuing;
            Ok(())
        })?;
        let task = state.require_task(task_id)?;
        let instruction = self.prompts.build_retry_instruction(
            &state,
            task,
            &error_text,
            attempt_no,
            self.config.max_retry_per_task,
        );

        let output = match self.agent.invoke(task_id, &instruction).await {
            Ok(output) => output,
            Err(e) => {
                warn!(task_id, error = %e, "Agent invocation failed");
                AgentOutput {
                    success: false,
                    exit_code: None,
                    stderr: e.to_string(),
                    ..Default::default()
                }
            }
        };

        if output.success {
            self.store.update(|state| state.complete_task(task_id, Utc::now()))?;
            info!(task_id, attempt = attempt_no, "Retry succeeded");
            return Ok(RetryOutcome::RetriedSuccess);
        }

        let failure_text = output.error_text();
        let failure_kind = classify_exit(output.exit_code, &failure_text);
        self.store.update(|state| {
            state.fail_task(task_id, &failure_text, Utc::now())?;
            if !state.status.is_terminal() {
                state.status = PipelineStatus::Running;
            }
            Ok(())
        })?;

        if let Err(e) = self
            .error_log
            .append(&ErrorLogEntry::new(task_id, failure_kind, &failure_text))
        {
            warn!(error = %e, "Failed to append error log");
        }

        self.alerter
            .raise(
                Alert::new(
                    AlertKind::RetryFailed,
                    Severity::Medium,
                    format!(
                        "Retry {}/{} failed ({}): {}",
                        attempt_no,
                        self.config.max_retry_per_task,
                        failure_kind,
                        truncate_chars(&single_line(&failure_text), 200)
                    ),
                )
                .with_task(task_id),
            )
            .await;

        Ok(RetryOutcome::RetriedFailure {
            kind: failure_kind,
            error: failure_text,
        })
    }

    async fn raise_refusal(
        &self,
        task_id: &str,
        kind: ErrorKind,
        reason: &RefusalReason,
        error_text: &str,
    ) {
        let (alert_kind, severity) = if reason.is_ceiling() {
            (AlertKind::RetryCeilingReached, Severity::Critical)
        } else if *reason == RefusalReason::TaskCompleted {
            (AlertKind::RetryRefused, Severity::Low)
        } else {
            (AlertKind::RetryRefused, Severity::High)
        };

        let mut message = format!("Retry refused for {} ({}): {}", task_id, kind, reason);
        if !error_text.is_empty() {
            message.push_str(&format!(
                ". Last error: {}",
                truncate_chars(&single_line(error_text), 200)
            ));
        }

        let mut alert = Alert::new(alert_kind, severity, message).with_task(task_id);
        if severity >= Severity::High {
            alert = alert.with_manual_options();
        }
        self.alerter.raise(alert).await;
    }

    /// Hand a task whose backoff was interrupted back to FAILED so the next
    /// supervisor picks it up again. The accepted attempt stays counted.
    fn release_aborted(&self, task_id: &str, error_text: &str) {
        let note = if error_text.is_empty() {
            "retry interrupted during backoff"
        } else {
            error_text
        };
        let released = self.store.update(|state| {
            if state
                .task(task_id)
                .is_some_and(|t| t.status == TaskStatus::Pending)
            {
                state.fail_task(task_id, note, Utc::now())?;
            }
            if state.status == PipelineStatus::Recovering {
                state.status = PipelineStatus::Running;
            }
            Ok(())
        });
        match released {
            Ok(_) => info!(task_id, "Retry aborted during backoff, task left FAILED"),
            Err(e) => warn!(task_id, error = %e, "Failed to release aborted retry"),
        }
    }

    /// Sleeps for `delay` unless the stop channel fires first.
    async fn wait_backoff(&self, delay: Duration) -> Result<()> {
        let mut stop = self.stop.clone();
        if *stop.borrow() {
            return Err(WardenError::Aborted);
        }
        if delay.is_zero() {
            return Ok(());
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = stop.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can stop us any more.
                        (&mut sleep).await;
                        return Ok(());
                    }
                    if *stop.borrow() {
                        info!("Backoff interrupted by stop signal");
                        return Err(WardenError::Aborted);
                    }
                }
            }
        }
    }

    /// Retry view for every task that has retries or is currently failed.
    pub fn stats(&self) -> Result<RetryStats> {
        let state = self.store.read()?;
        let entries = self.error_log.entries().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read error log");
            Vec::new()
        });

        let mut records = Vec::new();
        for task in state.ordered_tasks() {
            let attempts = state.retries_for(&task.id);
            if attempts == 0 && task.status != TaskStatus::Failed {
                continue;
            }

            let last_entry = entries.iter().rev().find(|e| e.task_id == task.id);
            let last_error_kind = last_entry
                .map(|e| e.kind)
                .or_else(|| task.last_error.as_deref().map(classify));

            let next_eligible_at = match last_error_kind {
                Some(kind)
                    if task.status == TaskStatus::Failed
                        && evaluate_retry(&state, &task.id, kind, &self.config).is_none() =>
                {
                    let failed_at = last_entry
                        .map(|e| e.timestamp)
                        .or(task.ended_at)
                        .unwrap_or(state.last_updated_at);
                    let delay = backoff_delay(&self.config, attempts);
                    chrono::Duration::from_std(delay)
                        .ok()
                        .map(|d| failed_at + d)
                }
                _ => None,
            };

            records.push(RetryRecord {
                task_id: task.id.clone(),
                status: task.status,
                attempt_count: attempts,
                last_error_kind,
                last_error: task.last_error.clone(),
                next_eligible_at,
            });
        }

        debug!(records = records.len(), "Retry stats computed");
        Ok(RetryStats {
            total_retries: state.retry_info.total_retries,
            max_total_retries: self.config.max_total_retries,
            max_retry_per_task: self.config.max_retry_per_task,
            records,
        })
    }

    /// Failed tasks worth handing to `attempt_retry`: those the policy would
    /// accept, plus those a retry ceiling now refuses, so the refusal gets
    /// recorded. Kinds come from the task's most recent logged failure.
    pub fn retry_candidates(&self) -> Result<Vec<RetryCandidate>> {
        let state = self.store.read()?;
        let mut candidates = Vec::new();
        for task in state.ordered_tasks() {
            if task.status != TaskStatus::Failed {
                continue;
            }
            let error = task.last_error.clone().unwrap_or_default();
            let kind = match self.error_log.last_for_task(&task.id) {
                Ok(Some(entry)) => entry.kind,
                _ => classify(&error),
            };
            let exhausted = match evaluate_retry(&state, &task.id, kind, &self.config) {
                None => None,
                Some(reason) if reason.is_ceiling() => Some(reason),
                Some(_) => continue,
            };
            candidates.push(RetryCandidate {
                task_id: task.id.clone(),
                kind,
                error,
                exhausted,
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Task;

    fn state_with(total: u32, per_task: u32) -> ExecutionState {
        let mut state = ExecutionState::new(vec![Task::new("T1"), Task::new("T2")]);
        state.retry_info.total_retries = total;
        state
            .retry_info
            .per_task_retries
            .insert("T1".into(), per_task);
        state
    }

    #[test]
    fn test_policy_order() {
        let config = RetryConfig::default();

        // Total ceiling beats everything, even a non-retryable kind.
        assert_eq!(
            evaluate_retry(&state_with(10, 0), "T1", ErrorKind::PermissionDenied, &config),
            Some(RefusalReason::TotalCeiling { limit: 10 })
        );
        assert_eq!(
            evaluate_retry(&state_with(3, 3), "T1", ErrorKind::PermissionDenied, &config),
            Some(RefusalReason::TaskCeiling { limit: 3 })
        );
        assert_eq!(
            evaluate_retry(&state_with(0, 0), "T1", ErrorKind::PermissionDenied, &config),
            Some(RefusalReason::NotRetryable(ErrorKind::PermissionDenied))
        );
        assert_eq!(
            evaluate_retry(&state_with(0, 0), "T1", ErrorKind::UnknownError, &config),
            None
        );
    }

    #[test]
    fn test_per_task_ceiling_is_per_task() {
        let config = RetryConfig::default();
        let state = state_with(3, 3);
        assert!(evaluate_retry(&state, "T2", ErrorKind::Timeout, &config).is_none());
    }

    #[test]
    fn test_completed_task_refused() {
        let config = RetryConfig::default();
        let mut state = state_with(0, 0);
        state.complete_task("T2", Utc::now()).unwrap();
        assert_eq!(
            evaluate_retry(&state, "T2", ErrorKind::Timeout, &config),
            Some(RefusalReason::TaskCompleted)
        );
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(RetryOutcome::RetriedSuccess.as_str(), "RETRIED_SUCCESS");
        assert_eq!(
            RetryOutcome::Refused(RefusalReason::TaskCompleted).as_str(),
            "REFUSED"
        );
    }
}
