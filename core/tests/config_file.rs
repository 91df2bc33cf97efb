//! Integration tests for loading engine configuration from disk

#![allow(unused_crate_dependencies)]

use procwatch_core::{load_engine_config_from_toml_path, CoreError, TerminationSignal};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
pollInitialIntervalMs = 50
destroySignal = "term"
"#
    )
    .unwrap();

    let cfg = load_engine_config_from_toml_path(file.path()).unwrap();
    assert_eq!(cfg.poll_initial_interval_ms, 50);
    assert_eq!(cfg.poll_max_interval_ms, 1000);
    assert_eq!(cfg.destroy_timeout_secs, 10);
    assert_eq!(cfg.destroy_signal, TerminationSignal::Term);
    assert_eq!(cfg.log_level, "info");
}

#[test]
fn test_invalid_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "pollMaxIntervalMs = 5\npollInitialIntervalMs = 10").unwrap();

    let err = load_engine_config_from_toml_path(file.path()).unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
}

#[test]
fn test_malformed_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("procwatch.toml");
    std::fs::write(&path, "pollInitialIntervalMs = \"fast\"").unwrap();

    let err = load_engine_config_from_toml_path(&path).unwrap_err();
    assert_eq!(err.code(), "PROC005");
}
