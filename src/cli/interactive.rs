//! Interactive recovery menu.

use std::io::{self, Write};

use console::{Term, style};

use crate::error::Result;
use crate::recovery::RecoveryPointSummary;
use crate::state::{ExecutionState, TaskStatus};

/// What the operator chose to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryChoice {
    Continue(String),
    RetryFailed,
    Restore(String),
    Verify(String),
    WriteReport,
    Quit,
}

pub struct RecoveryMenu {
    term: Term,
    max_points: usize,
}

impl RecoveryMenu {
    const DEFAULT_MAX_POINTS: usize = 5;

    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
            max_points: Self::DEFAULT_MAX_POINTS,
        }
    }

    pub fn prompt(
        &self,
        state: Option<&ExecutionState>,
        points: &[RecoveryPointSummary],
    ) -> Result<RecoveryChoice> {
        self.show_header()?;
        self.show_state(state);

        let implied = state.and_then(|s| s.implied_task()).map(|t| t.id.clone());
        let has_failed = state.is_some_and(|s| {
            s.tasks
                .values()
                .any(|t| t.status == TaskStatus::Failed)
        });

        let mut options: Vec<(String, Option<RecoveryChoice>)> = Vec::new();
        if let Some(task_id) = &implied {
            options.push((
                format!("Continue task {}", task_id),
                Some(RecoveryChoice::Continue(task_id.clone())),
            ));
            options.push((
                format!("Verify artifacts of {}", task_id),
                Some(RecoveryChoice::Verify(task_id.clone())),
            ));
        }
        if has_failed {
            options.push((
                "Retry every eligible failed task".to_string(),
                Some(RecoveryChoice::RetryFailed),
            ));
        }
        if !points.is_empty() {
            options.push(("Restore a recovery point".to_string(), None));
        }
        options.push((
            "Write recovery report".to_string(),
            Some(RecoveryChoice::WriteReport),
        ));
        options.push(("Quit".to_string(), Some(RecoveryChoice::Quit)));

        println!("{}", style("Available Actions:").bold().white());
        for (i, (label, _)) in options.iter().enumerate() {
            println!("  [{}] {}", style(i + 1).cyan().bold(), label);
        }
        println!();

        let selection = self.prompt_number(1, options.len())?;
        match options.swap_remove(selection - 1).1 {
            Some(choice) => Ok(choice),
            None => self.choose_point(points),
        }
    }

    fn show_header(&self) -> Result<()> {
        self.term.clear_screen()?;
        println!();
        println!(
            "{}",
            style("╔════════════════════════════════════════════════════════════╗")
                .yellow()
                .bold()
        );
        println!(
            "{}",
            style("║              🛡  Claude-Warden Recovery                    ║")
                .yellow()
                .bold()
        );
        println!(
            "{}",
            style("╚════════════════════════════════════════════════════════════╝")
                .yellow()
                .bold()
        );
        println!();
        Ok(())
    }

    fn show_state(&self, state: Option<&ExecutionState>) {
        let Some(state) = state else {
            println!("{}", style("State unavailable (missing or corrupt).").red());
            println!();
            return;
        };

        println!(
            "Pipeline {} · {}% ({}/{}) · current {}",
            style(state.status).bold(),
            state.progress_percent(),
            state.completed_tasks,
            state.total_tasks,
            state.current_task_id.as_deref().unwrap_or("-")
        );
        for task in state
            .ordered_tasks()
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
        {
            println!(
                "  {} {} {}",
                style("✗").red(),
                task.id,
                style(task.last_error.as_deref().unwrap_or("")).dim()
            );
        }
        println!();
    }

    fn choose_point(&self, points: &[RecoveryPointSummary]) -> Result<RecoveryChoice> {
        let shown: Vec<_> = points.iter().take(self.max_points).collect();
        println!();
        println!("{}", style("Recovery Points:").bold().white());
        for (i, p) in shown.iter().enumerate() {
            println!(
                "  [{}] {} {} {}/{} {}",
                style(i + 1).cyan().bold(),
                p.id,
                p.status,
                p.completed_tasks,
                p.total_tasks,
                style(&p.reason).dim()
            );
        }
        println!();

        let selection = self.prompt_number(1, shown.len())?;
        let id = shown[selection - 1].id.clone();
        if self.confirm(&format!("Replace current state with {}?", id))? {
            Ok(RecoveryChoice::Restore(id))
        } else {
            Ok(RecoveryChoice::Quit)
        }
    }

    fn prompt_number(&self, min: usize, max: usize) -> Result<usize> {
        loop {
            print!("{}", style(format!("Select ({}-{}): ", min, max)).cyan());
            io::stdout().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            match input.trim().parse::<usize>() {
                Ok(n) if n >= min && n <= max => return Ok(n),
                _ => {
                    println!(
                        "{}",
                        style(format!("Please enter a number between {} and {}", min, max)).red()
                    );
                }
            }
        }
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        print!("{} ", style(format!("{} [y/N]", question)).cyan());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(matches!(input.trim(), "y" | "Y" | "yes"))
    }
}

impl Default for RecoveryMenu {
    fn default() -> Self {
        Self::new()
    }
}
