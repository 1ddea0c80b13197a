use pve_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigMode, UnusedKeyPolicy};

const YAML: &str = r#"
engine:
  timezone: "Asia/Kolkata"
sweep:
  interval_secs: 30
database:
  url_env: "PVE_DATABASE_URL"
legacy:
  supabase_table: "scan_logs"
"#;

#[test]
fn warn_mode_reports_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn never errors");
    assert_eq!(report.mode, "DAEMON");
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/supabase_table".to_string()]);
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigMode::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
    assert!(err.contains("/legacy/supabase_table"), "{err}");
}

#[test]
fn replay_does_not_consume_daemon_only_sections() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(ConfigMode::Replay, &loaded.config_json, UnusedKeyPolicy::Warn)
        .unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/database/url_env".to_string(),
            "/legacy/supabase_table".to_string(),
            "/sweep/interval_secs".to_string(),
        ]
    );
}

#[test]
fn clean_config_passes_fail_mode() {
    let loaded = load_layered_yaml_from_strings(&["engine:\n  grace_margin_secs: 120\n"]).unwrap();
    let report = report_unused_keys(ConfigMode::Replay, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap();
    assert!(report.is_clean());
}
