#![allow(dead_code)]

pub mod mock_agent;
pub mod project;

pub use mock_agent::ScriptedAgent;
pub use project::{TestProject, fast_config, three_tasks};
