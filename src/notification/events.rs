use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RetryRefused,
    RetryCeilingReached,
    RetryFailed,
    FatalPattern,
    HealthFinding,
    StateCorrupt,
    RecoveryRestored,
    Supervisor,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryRefused => "retry.refused",
            Self::RetryCeilingReached => "retry.ceiling_reached",
            Self::RetryFailed => "retry.failed",
            Self::FatalPattern => "health.fatal_pattern",
            Self::HealthFinding => "health.finding",
            Self::StateCorrupt => "state.corrupt",
            Self::RecoveryRestored => "recovery.restored",
            Self::Supervisor => "supervisor",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::RetryRefused => "🚫",
            Self::RetryCeilingReached => "⛔",
            Self::RetryFailed => "⚠️",
            Self::FatalPattern => "💀",
            Self::HealthFinding => "🩺",
            Self::StateCorrupt => "❌",
            Self::RecoveryRestored => "↩️",
            Self::Supervisor => "🛡️",
        }
    }
}

/// Manual recovery options offered whenever automation gives up on a task.
pub fn manual_options(task_id: Option<&str>) -> Vec<String> {
    let task = task_id.unwrap_or("<TASK>");
    vec![
        format!("claude-warden recover continue {}", task),
        "claude-warden recover restore <ID>  (see: claude-warden recover list)".to_string(),
        format!("claude-warden recover verify {}", task),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual_options: Vec<String>,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: format!("alert-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            timestamp: Utc::now(),
            kind,
            severity,
            task_id: None,
            message: message.into(),
            manual_options: Vec::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_manual_options(mut self) -> Self {
        self.manual_options = manual_options(self.task_id.as_deref());
        self
    }

    pub fn from_finding(finding: &Finding) -> Self {
        use crate::health::FindingKind;

        let kind = match finding.kind {
            FindingKind::FatalPattern => AlertKind::FatalPattern,
            FindingKind::StateCorrupt => AlertKind::StateCorrupt,
            _ => AlertKind::HealthFinding,
        };
        let mut alert = Self::new(
            kind,
            finding.severity,
            format!("{}: {}", finding.kind, finding.message),
        );
        alert.task_id = finding.task_id.clone();
        if finding.severity == Severity::Critical {
            alert = alert.with_manual_options();
        }
        alert
    }

    pub fn title(&self) -> String {
        format!("{} Claude-Warden: {}", self.kind.emoji(), self.kind.as_str())
    }

    pub fn body(&self) -> String {
        let mut parts = Vec::new();
        if let Some(task_id) = &self.task_id {
            parts.push(format!("Task: {}", task_id));
        }
        parts.push(self.message.clone());
        if !self.manual_options.is_empty() {
            parts.push(format!("Options: {}", self.manual_options.join(" | ")));
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FindingKind;

    #[test]
    fn test_manual_options_name_task() {
        let alert = Alert::new(AlertKind::RetryRefused, Severity::High, "refused")
            .with_task("T2")
            .with_manual_options();
        assert_eq!(alert.manual_options.len(), 3);
        assert!(alert.manual_options[0].ends_with("continue T2"));
        assert!(alert.body().contains("Task: T2"));
    }

    #[test]
    fn test_fatal_finding_becomes_fatal_alert() {
        let finding = Finding::new(
            FindingKind::FatalPattern,
            Severity::Critical,
            "segmentation fault",
        )
        .with_task("T1");
        let alert = Alert::from_finding(&finding);
        assert_eq!(alert.kind, AlertKind::FatalPattern);
        assert_eq!(alert.task_id.as_deref(), Some("T1"));
        assert!(!alert.manual_options.is_empty());
    }

    #[test]
    fn test_wire_format() {
        let alert = Alert::new(AlertKind::RetryCeilingReached, Severity::High, "cap");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "retry_ceiling_reached");
        assert_eq!(json["severity"], "high");
        assert!(json.get("manualOptions").is_none());
        assert!(json["id"].as_str().unwrap().starts_with("alert-"));
    }
}
