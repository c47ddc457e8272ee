use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recovery::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Low => "ℹ",
            Self::Medium => "⚠",
            Self::High => "✗",
            Self::Critical => "🛑",
        }
    }

    /// High and critical findings make one-shot checks fail.
    pub fn is_blocking(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    TaskStalled,
    StateStale,
    ErrorRateHigh,
    NetworkDown,
    AgentApiUnreachable,
    ResourcePressure,
    ProgressSlow,
    FatalPattern,
    CheckFailed,
    StateCorrupt,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStalled => "TASK_STALLED",
            Self::StateStale => "STATE_STALE",
            Self::ErrorRateHigh => "ERROR_RATE_HIGH",
            Self::NetworkDown => "NETWORK_DOWN",
            Self::AgentApiUnreachable => "AGENT_API_UNREACHABLE",
            Self::ResourcePressure => "RESOURCE_PRESSURE",
            Self::ProgressSlow => "PROGRESS_SLOW",
            Self::FatalPattern => "FATAL_PATTERN",
            Self::CheckFailed => "CHECK_FAILED",
            Self::StateCorrupt => "STATE_CORRUPT",
        }
    }

    /// Error kind used when this finding is turned into a synthetic failure.
    pub fn synthetic_error_kind(&self) -> ErrorKind {
        match self {
            Self::TaskStalled | Self::StateStale => ErrorKind::Timeout,
            _ => ErrorKind::UnknownError,
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            task_id: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub disk_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub load_average: Option<f64>,
    pub cpu_count: usize,
}

impl ResourceSnapshot {
    pub fn load_per_core(&self) -> Option<f64> {
        self.load_average
            .map(|load| load / self.cpu_count.max(1) as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connectivity {
    pub network_reachable: bool,
    pub agent_api_reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub timestamp: DateTime<Utc>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<Connectivity>,
}

impl HealthCheckResult {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            findings: Vec::new(),
            resources: None,
            connectivity: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.findings.iter().any(|f| f.severity.is_blocking())
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn has(&self, kind: FindingKind) -> bool {
        self.findings.iter().any(|f| f.kind == kind)
    }
}
