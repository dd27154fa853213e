//! Tests for logging configuration.

use audition::observability::LoggingConfig;

#[test]
fn defaults_to_info_text_logs() {
    let config = LoggingConfig::default();
    assert_eq!(config.service_name, "audition");
    assert_eq!(config.log_level, "info");
    assert!(!config.json_logs);
}

#[test]
fn builder_methods_override_defaults() {
    let config = LoggingConfig::new("audition-worker")
        .with_log_level("audition_orchestrator=debug")
        .with_json_logs(true);
    assert_eq!(config.service_name, "audition-worker");
    assert_eq!(config.log_level, "audition_orchestrator=debug");
    assert!(config.json_logs);
}

#[test]
fn invalid_level_is_rejected() {
    // RUST_LOG, when set, takes precedence over the configured level.
    if std::env::var("RUST_LOG").is_ok_and(|v| !v.trim().is_empty()) {
        return;
    }
    let config = LoggingConfig::default().with_log_level("audition=loudest");
    assert!(config.env_filter().is_err());
}
