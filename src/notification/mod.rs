//! Durable alerts and their delivery.
//!
//! - `Alert`: timestamped record of something an operator should know about
//! - `AlertHistory`: append-only JSON Lines file with size-based rotation
//! - `Notifier`: desktop notification and hook command delivery

mod events;
mod history;
mod notifier;

pub use events::{Alert, AlertKind, manual_options};
pub use history::AlertHistory;
pub use notifier::Notifier;

use tracing::{info, warn};

use crate::config::{NotificationConfig, ProjectPaths, ReportConfig};

/// Records an alert durably, then hands it to the notifier.
#[derive(Clone)]
pub struct Alerter {
    history: AlertHistory,
    notifier: Notifier,
}

impl Alerter {
    pub fn new(history: AlertHistory, notifier: Notifier) -> Self {
        Self { history, notifier }
    }

    pub fn for_project(
        paths: &ProjectPaths,
        report: &ReportConfig,
        notification: &NotificationConfig,
    ) -> Self {
        Self::new(
            AlertHistory::new(
                paths.alert_log(),
                report.max_alert_bytes,
                report.retain_alerts,
            ),
            Notifier::new(notification.clone()),
        )
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub async fn raise(&self, alert: Alert) {
        info!(
            kind = alert.kind.as_str(),
            severity = %alert.severity,
            task_id = alert.task_id.as_deref().unwrap_or("-"),
            "{}",
            alert.message
        );
        if let Err(e) = self.history.append(&alert) {
            warn!(error = %e, "Failed to record alert");
        }
        self.notifier.notify(&alert).await;
    }
}
