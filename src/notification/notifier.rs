use tokio::process::Command;
use tracing::{debug, warn};

use super::Alert;
use crate::config::NotificationConfig;
use crate::health::Severity;

#[derive(Clone)]
pub struct Notifier {
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    pub async fn notify(&self, alert: &Alert) {
        if !self.config.enabled {
            return;
        }

        // Desktop notifications only for alerts that need a human soon
        if self.config.desktop && alert.severity >= Severity::High {
            self.send_desktop_notification(alert).await;
        }

        if let Some(hook) = &self.config.hook_command {
            self.run_hook(hook, alert).await;
        }
    }

    async fn send_desktop_notification(&self, alert: &Alert) {
        let title = alert.title();
        let body = alert.body();

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                r#"display notification "{}" with title "{}""#,
                body.replace('"', r#"\""#).replace('\n', " "),
                title.replace('"', r#"\""#)
            );

            let result = Command::new("osascript")
                .args(["-e", &script])
                .output()
                .await;

            if let Err(e) = result {
                debug!(error = %e, "Failed to send desktop notification");
            }
        }

        #[cfg(target_os = "linux")]
        {
            let urgency = if alert.severity == Severity::Critical {
                "critical"
            } else {
                "normal"
            };
            let result = Command::new("notify-send")
                .args(["-u", urgency, &title, &body])
                .output()
                .await;

            if let Err(e) = result {
                debug!(error = %e, "Failed to send desktop notification");
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            debug!(title, body, "Desktop notifications unsupported on this platform");
        }
    }

    async fn run_hook(&self, hook_cmd: &str, alert: &Alert) {
        let json = match serde_json::to_string(alert) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "Failed to serialize alert for hook");
                return;
            }
        };

        let result = Command::new("sh")
            .args(["-c", hook_cmd])
            .env("WARDEN_ALERT", alert.kind.as_str())
            .env("WARDEN_ALERT_SEVERITY", alert.severity.as_str())
            .env("WARDEN_TASK_ID", alert.task_id.as_deref().unwrap_or(""))
            .env("WARDEN_ALERT_JSON", &json)
            .output()
            .await;

        match result {
            Ok(output) if !output.status.success() => {
                debug!(hook = %hook_cmd, status = ?output.status.code(), "Alert hook exited non-zero");
            }
            Err(e) => debug!(error = %e, hook = %hook_cmd, "Failed to run hook"),
            Ok(_) => {}
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::notification::AlertKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_hook_receives_alert_env() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("hook.out");
        let config = NotificationConfig {
            enabled: true,
            desktop: false,
            hook_command: Some(format!(
                "printf '%s %s' \"$WARDEN_ALERT\" \"$WARDEN_TASK_ID\" > {}",
                out.display()
            )),
        };

        let alert = Alert::new(AlertKind::RetryRefused, Severity::High, "refused").with_task("T7");
        Notifier::new(config).notify(&alert).await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written, "retry.refused T7");
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("hook.out");
        let config = NotificationConfig {
            enabled: false,
            desktop: false,
            hook_command: Some(format!("touch {}", out.display())),
        };

        let alert = Alert::new(AlertKind::Supervisor, Severity::Low, "noop");
        Notifier::new(config).notify(&alert).await;
        assert!(!out.exists());
    }
}
