//! External agent boundary.
//!
//! `AgentInvoker` abstracts the process doing the task work; the supervisor
//! only ever sees its exit signal and output. `ClaudeCliInvoker` runs the
//! configured CLI as a subprocess.

mod invoker;
mod prompt;

pub use invoker::{AgentInvoker, AgentOutput, ClaudeCliInvoker, TIMEOUT_EXIT_CODE};
pub use prompt::PromptBuilder;
