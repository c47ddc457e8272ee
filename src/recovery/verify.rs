use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::state::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReport {
    pub task_id: String,
    pub present: Vec<String>,
    pub empty: Vec<String>,
    pub missing: Vec<String>,
}

impl ArtifactReport {
    /// True when every expected artifact exists and is non-empty. A task with
    /// no expected artifacts is trivially complete.
    pub fn is_complete(&self) -> bool {
        self.empty.is_empty() && self.missing.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.present.len() + self.empty.len() + self.missing.len()
    }
}

/// Check a task's expected artifacts relative to the project root.
pub fn verify_artifacts(root: &Path, task: &Task) -> ArtifactReport {
    let mut report = ArtifactReport {
        task_id: task.id.clone(),
        present: Vec::new(),
        empty: Vec::new(),
        missing: Vec::new(),
    };

    for artifact in &task.expected_artifacts {
        let path = root.join(artifact);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                let has_entries = std::fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(false);
                if has_entries {
                    report.present.push(artifact.clone());
                } else {
                    report.empty.push(artifact.clone());
                }
            }
            Ok(meta) if meta.len() > 0 => report.present.push(artifact.clone()),
            Ok(_) => report.empty.push(artifact.clone()),
            Err(_) => report.missing.push(artifact.clone()),
        }
    }

    report
}
