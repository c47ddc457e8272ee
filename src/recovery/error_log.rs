//! Append-only record of classified task failures (`logs/errors.jsonl`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::classifier::ErrorKind;
use crate::error::Result;
use crate::utils::{FileLock, append_line, lock_path_for, truncate_with_marker, write_atomic};

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(task_id: impl Into<String>, kind: ErrorKind, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            kind,
            message: truncate_with_marker(message, MAX_MESSAGE_CHARS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, entry: &ErrorLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _flock = FileLock::acquire(&lock_path_for(&self.path))?;
        append_line(&self.path, &line)
    }

    /// All parseable entries, oldest first. Malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<ErrorLogEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed error log line"),
            }
        }
        Ok(entries)
    }

    pub fn count_since(&self, since: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.timestamp >= since)
            .count())
    }

    /// Keep only the newest `keep` entries. Returns how many were dropped.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let _flock = FileLock::acquire(&lock_path_for(&self.path))?;
        let entries = self.entries()?;
        let dropped = entries.len().saturating_sub(keep);
        if dropped == 0 {
            return Ok(0);
        }

        let mut content = String::new();
        for entry in &entries[dropped..] {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        write_atomic(&self.path, content.as_bytes())?;
        Ok(dropped)
    }

    pub fn last_for_task(&self, task_id: &str) -> Result<Option<ErrorLogEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.task_id == task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.jsonl"));

        log.append(&ErrorLogEntry::new("T1", ErrorKind::Timeout, "timed out"))
            .unwrap();
        log.append(&ErrorLogEntry::new("T2", ErrorKind::ApiError, "429"))
            .unwrap();
        log.append(&ErrorLogEntry::new("T1", ErrorKind::NetworkError, "dns"))
            .unwrap();

        assert_eq!(log.entries().unwrap().len(), 3);
        let last = log.last_for_task("T1").unwrap().unwrap();
        assert_eq!(last.kind, ErrorKind::NetworkError);
        assert!(log.last_for_task("T9").unwrap().is_none());
    }

    #[test]
    fn test_count_since_filters_old_entries() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.jsonl"));

        let mut old = ErrorLogEntry::new("T1", ErrorKind::ApiError, "old");
        old.timestamp = Utc::now() - Duration::hours(5);
        log.append(&old).unwrap();
        log.append(&ErrorLogEntry::new("T1", ErrorKind::ApiError, "new"))
            .unwrap();

        let since = Utc::now() - Duration::minutes(30);
        assert_eq!(log.count_since(since).unwrap(), 1);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let log = ErrorLog::new(&path);
        log.append(&ErrorLogEntry::new("T1", ErrorKind::Timeout, "x"))
            .unwrap();
        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("errors.jsonl"));
        for n in 0..5 {
            log.append(&ErrorLogEntry::new(format!("T{}", n), ErrorKind::Timeout, "x"))
                .unwrap();
        }

        assert_eq!(log.prune(2).unwrap(), 3);
        let ids: Vec<_> = log.entries().unwrap().into_iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec!["T3", "T4"]);
        assert_eq!(log.prune(2).unwrap(), 0);
    }

    #[test]
    fn test_prune_never_drops_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.jsonl");
        let log = ErrorLog::new(&path);
        for _ in 0..200 {
            log.append(&ErrorLogEntry::new("OLD", ErrorKind::Timeout, "x"))
                .unwrap();
        }

        let appender = {
            let log = ErrorLog::new(&path);
            std::thread::spawn(move || {
                for n in 0..50 {
                    log.append(&ErrorLogEntry::new(format!("NEW{}", n), ErrorKind::ApiError, "y"))
                        .unwrap();
                }
            })
        };
        let pruner = {
            let log = ErrorLog::new(&path);
            std::thread::spawn(move || log.prune(50).unwrap())
        };
        appender.join().unwrap();
        pruner.join().unwrap();

        let fresh = log
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.task_id.starts_with("NEW"))
            .count();
        assert_eq!(fresh, 50);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("none.jsonl"));
        assert!(log.entries().unwrap().is_empty());
    }
}
