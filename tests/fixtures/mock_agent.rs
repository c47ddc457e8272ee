//! Scripted agent for driving the supervisor without spawning a real CLI.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use claude_warden::agent::{AgentInvoker, AgentOutput};
use claude_warden::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task_id: String,
    pub instruction: String,
}

/// Replays queued outputs in order, then falls back to `default`.
#[derive(Debug)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<AgentOutput>>,
    default: AgentOutput,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedAgent {
    pub fn always_succeeds() -> Self {
        Self::with_default(AgentOutput::succeeded("done"))
    }

    pub fn always_fails(stderr: &str) -> Self {
        Self::with_default(AgentOutput::failed(1, stderr))
    }

    pub fn with_default(default: AgentOutput) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, output: AgentOutput) -> Self {
        self.script.lock().push_back(output);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, task_id: &str, instruction: &str) -> Result<AgentOutput> {
        self.calls.lock().push(Invocation {
            task_id: task_id.to_string(),
            instruction: instruction.to_string(),
        });
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.default.clone()))
    }
}
