use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::machine::{PipelineStatus, TaskStatus};
use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryInfo {
    pub total_retries: u32,
    pub per_task_retries: BTreeMap<String, u32>,
}

impl RetryInfo {
    pub fn for_task(&self, task_id: &str) -> u32 {
        self.per_task_retries.get(task_id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Position in the pipeline.
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            status: TaskStatus::Pending,
            order: 0,
            started_at: None,
            ended_at: None,
            expected_artifacts: Vec::new(),
            last_error: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.expected_artifacts = artifacts;
        self
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(WardenError::InvalidTaskTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// The single root record shared by every supervisor component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    #[serde(default)]
    pub status: PipelineStatus,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub failed_tasks: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_info: RetryInfo,
    /// Opaque to the supervisor; passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<Value>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    /// Fields written by the agent that the supervisor does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ExecutionState {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        let tasks: BTreeMap<String, Task> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, mut t)| {
                t.order = i;
                (t.id.clone(), t)
            })
            .collect();

        let mut state = Self {
            status: PipelineStatus::NotStarted,
            current_task_id: None,
            total_tasks: tasks.len(),
            completed_tasks: 0,
            failed_tasks: 0,
            started_at: None,
            last_updated_at: Utc::now(),
            retry_info: RetryInfo::default(),
            quality_metrics: None,
            tasks,
            extra: BTreeMap::new(),
        };
        state.refresh_counters();
        state
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| WardenError::TaskNotFound(task_id.to_string()))
    }

    pub fn require_task(&self, task_id: &str) -> Result<&Task> {
        self.task(task_id)
            .ok_or_else(|| WardenError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks in pipeline order.
    pub fn ordered_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task_id.as_deref().and_then(|id| self.task(id))
    }

    /// The task an operator most likely wants continued: the current one, else
    /// the first failed or in-progress task, else the first pending one.
    pub fn implied_task(&self) -> Option<&Task> {
        if let Some(task) = self.current_task()
            && task.status != TaskStatus::Completed
        {
            return Some(task);
        }
        let ordered = self.ordered_tasks();
        ordered
            .iter()
            .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::InProgress))
            .or_else(|| ordered.iter().find(|t| t.status == TaskStatus::Pending))
            .copied()
    }

    pub fn retries_for(&self, task_id: &str) -> u32 {
        self.retry_info.for_task(task_id)
    }

    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .values()
                .all(|t| t.status == TaskStatus::Completed)
    }

    pub fn progress_ratio(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64
    }

    pub fn progress_percent(&self) -> u8 {
        (self.progress_ratio() * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Recompute counters from the task map so `completed + failed <= total`.
    pub fn refresh_counters(&mut self) {
        self.completed_tasks = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        self.failed_tasks = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        self.total_tasks = self.total_tasks.max(self.tasks.len());
    }

    /// Clears a `currentTaskId` that no longer names a known task.
    pub fn heal_current_task(&mut self) -> bool {
        if let Some(id) = &self.current_task_id
            && !self.tasks.contains_key(id)
        {
            warn!(task_id = %id, "Current task missing from task map, clearing reference");
            self.current_task_id = None;
            return true;
        }
        false
    }

    pub fn start_task(&mut self, task_id: &str, now: DateTime<Utc>) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.transition(TaskStatus::InProgress)?;
        task.started_at = Some(now);
        task.ended_at = None;

        self.current_task_id = Some(task_id.to_string());
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if !matches!(
            self.status,
            PipelineStatus::Recovering | PipelineStatus::Continuing
        ) {
            self.status = PipelineStatus::Running;
        }
        self.refresh_counters();
        Ok(())
    }

    pub fn complete_task(&mut self, task_id: &str, now: DateTime<Utc>) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.transition(TaskStatus::Completed)?;
        task.ended_at = Some(now);
        task.last_error = None;

        if self.current_task_id.as_deref() == Some(task_id) {
            self.current_task_id = None;
        }
        self.refresh_counters();
        self.status = if self.all_completed() {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Running
        };
        Ok(())
    }

    pub fn fail_task(&mut self, task_id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.transition(TaskStatus::Failed)?;
        task.ended_at = Some(now);
        task.last_error = Some(error.to_string());
        self.refresh_counters();
        Ok(())
    }

    /// Puts a failed or stalled task back to PENDING ahead of a re-run.
    pub fn reset_task(&mut self, task_id: &str) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.transition(TaskStatus::Pending)?;
        task.ended_at = None;
        self.refresh_counters();
        Ok(())
    }

    pub fn block_task(&mut self, task_id: &str, reason: &str) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.transition(TaskStatus::Blocked)?;
        task.last_error = Some(reason.to_string());
        self.refresh_counters();
        Ok(())
    }

    /// Marks the whole pipeline failed when `task_id` is the task in progress.
    pub fn fail_pipeline_if_current(&mut self, task_id: &str) {
        if self.current_task_id.as_deref() == Some(task_id) {
            self.status = PipelineStatus::Failed;
        }
    }
}
