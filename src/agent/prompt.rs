use crate::state::{ExecutionState, Task};
use crate::utils::truncate_with_marker;

const MAX_ERROR_CHARS: usize = 4000;

/// Builds the instruction handed to the external agent.
///
/// Every instruction names the task, points at the state file, and asks the
/// agent to re-verify what is already done before resuming, so a retry never
/// blindly repeats completed work.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    state_file: String,
}

impl PromptBuilder {
    pub fn new(state_file: impl Into<String>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    pub fn build_retry_instruction(
        &self,
        state: &ExecutionState,
        task: &Task,
        error_text: &str,
        attempt: u32,
        max_attempts: u32,
    ) -> String {
        let mut parts = vec![self.header(state, task)];

        parts.push(format!(
            "## Retry (attempt {}/{})\n\nThe previous attempt failed with:\n\n```\n{}\n```",
            attempt,
            max_attempts,
            if error_text.trim().is_empty() {
                "(no error output captured)".to_string()
            } else {
                truncate_with_marker(error_text.trim(), MAX_ERROR_CHARS)
            }
        ));

        parts.push(self.verification_steps(task));
        parts.join("\n\n")
    }

    pub fn build_continue_instruction(&self, state: &ExecutionState, task: &Task) -> String {
        let mut parts = vec![self.header(state, task)];

        if let Some(err) = &task.last_error {
            parts.push(format!(
                "## Last recorded error\n\n```\n{}\n```",
                truncate_with_marker(err, MAX_ERROR_CHARS)
            ));
        }

        parts.push(self.verification_steps(task));
        parts.join("\n\n")
    }

    fn header(&self, state: &ExecutionState, task: &Task) -> String {
        let title = task
            .title
            .as_deref()
            .map(|t| format!(": {}", t))
            .unwrap_or_default();
        format!(
            "# Resume task {id}{title}\n\nPipeline progress: {done}/{total} tasks completed.\nState file: {state_file}",
            id = task.id,
            title = title,
            done = state.completed_tasks,
            total = state.total_tasks,
            state_file = self.state_file,
        )
    }

    fn verification_steps(&self, task: &Task) -> String {
        let mut steps = vec![
            "## Before resuming".to_string(),
            String::new(),
            format!(
                "1. Re-read the state file and confirm task {} is the one to work on.",
                task.id
            ),
            "2. Inspect what earlier attempts already produced; keep valid work.".to_string(),
        ];

        if task.expected_artifacts.is_empty() {
            steps.push("3. Finish only what is still missing.".to_string());
        } else {
            steps.push(format!(
                "3. Verify these artifacts exist and are complete: {}",
                task.expected_artifacts.join(", ")
            ));
            steps.push("4. Finish only what is still missing.".to_string());
        }

        steps.push(String::new());
        steps.push(format!(
            "Exit with status 0 only when task {} is fully complete.",
            task.id
        ));
        steps.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new(vec![
            Task::new("T1").with_title("Draft chapter"),
            Task::new("T2").with_artifacts(vec!["out/report.md".into()]),
        ])
    }

    #[test]
    fn test_retry_instruction_names_task_and_error() {
        let state = state();
        let task = state.task("T1").unwrap();
        let text = PromptBuilder::new(".warden/state.json").build_retry_instruction(
            &state,
            task,
            "rate limit exceeded",
            2,
            3,
        );

        assert!(text.contains("task T1: Draft chapter"));
        assert!(text.contains("rate limit exceeded"));
        assert!(text.contains("attempt 2/3"));
        assert!(text.contains("Re-read the state file"));
    }

    #[test]
    fn test_artifacts_listed() {
        let state = state();
        let task = state.task("T2").unwrap();
        let text = PromptBuilder::new("s.json").build_continue_instruction(&state, task);
        assert!(text.contains("out/report.md"));
    }

    #[test]
    fn test_empty_error_placeholder() {
        let state = state();
        let task = state.task("T1").unwrap();
        let text = PromptBuilder::new("s.json").build_retry_instruction(&state, task, "  ", 1, 3);
        assert!(text.contains("no error output captured"));
    }
}
