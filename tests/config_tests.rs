use claude_warden::config::{ProjectPaths, WARDEN_DIR, WardenConfig};
use claude_warden::error::WardenError;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = WardenConfig::default();

    assert_eq!(config.retry.max_total_retries, 10);
    assert_eq!(config.retry.max_retry_per_task, 3);
    assert_eq!(config.retry.base_delay_secs, 30);
    assert_eq!(config.retry.max_delay_secs, 1800);

    assert_eq!(config.recovery.max_recovery_points, 20);

    assert_eq!(config.health.interval_secs, 60);
    assert_eq!(config.health.task_timeout_threshold_secs, 1800);
    assert_eq!(config.health.api_error_threshold, 5);
    assert!(config.health.auto_retry);
    assert!(!config.health.fatal_patterns.is_empty());

    assert_eq!(config.agent.command, "claude");
    assert_eq!(config.agent.timeout_secs, 3600);

    assert!(config.notification.enabled);
    assert!(config.notification.hook_command.is_none());

    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_falls_back_to_defaults() {
    let config: WardenConfig = toml::from_str(
        r#"
[retry]
max_total_retries = 4

[agent]
command = "my-agent"
"#,
    )
    .unwrap();

    assert_eq!(config.retry.max_total_retries, 4);
    assert_eq!(config.retry.max_retry_per_task, 3);
    assert_eq!(config.agent.command, "my-agent");
    assert_eq!(config.agent.timeout_secs, 3600);
    assert_eq!(config.health.interval_secs, 60);
}

#[test]
fn test_validation_collects_every_error() {
    let mut config = WardenConfig::default();
    config.retry.max_retry_per_task = 20;
    config.retry.base_delay_secs = 5000;
    config.health.probe_timeout_secs = 60;
    config.health.fatal_patterns = vec!["(unclosed".to_string()];

    let err = config.validate().unwrap_err();
    let WardenError::Config(message) = err else {
        panic!("expected a config error, got {err:?}");
    };
    assert!(message.contains("max_retry_per_task"));
    assert!(message.contains("base_delay_secs"));
    assert!(message.contains("probe_timeout_secs"));
    assert!(message.contains("fatal_patterns"));
}

#[tokio::test]
async fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut config = WardenConfig::default();
    config.retry.max_total_retries = 7;
    config.health.network_probe = "10.0.0.1:53".to_string();
    config.notification.hook_command = Some("notify-send".to_string());

    config.save(dir.path()).await.unwrap();
    let loaded = WardenConfig::load(dir.path()).await.unwrap();

    assert_eq!(loaded.retry.max_total_retries, 7);
    assert_eq!(loaded.health.network_probe, "10.0.0.1:53");
    assert_eq!(loaded.notification.hook_command.as_deref(), Some("notify-send"));
}

#[tokio::test]
async fn test_load_without_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = WardenConfig::load(dir.path()).await.unwrap();
    assert_eq!(config.retry.max_total_retries, 10);
}

#[tokio::test]
async fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[retry]\nmax_total_retries = 0\n",
    )
    .unwrap();

    let err = WardenConfig::load(dir.path()).await.unwrap_err();
    assert!(matches!(err, WardenError::Config(_)));
}

#[tokio::test]
async fn test_project_paths_layout() {
    let dir = TempDir::new().unwrap();
    let paths = ProjectPaths::new(dir.path().to_path_buf());

    assert!(!paths.is_initialized());
    paths.ensure_dirs().await.unwrap();
    assert!(paths.is_initialized());

    let warden_dir = dir.path().join(WARDEN_DIR);
    assert_eq!(paths.state_file, warden_dir.join("state.json"));
    assert!(paths.recovery_dir.is_dir());
    assert!(paths.logs_dir.is_dir());
    assert!(paths.reports_dir.is_dir());
    assert!(paths.locks_dir.is_dir());
    assert_eq!(paths.error_log(), warden_dir.join("logs").join("errors.jsonl"));
    assert_eq!(paths.alert_log(), warden_dir.join("logs").join("alerts.jsonl"));
}
