//! Integration tests for pbisect-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join(".pbisect");
    std::fs::create_dir_all(&dir).unwrap();

    let config_content = r#"
[storage]
base_path = "/custom/base"

[bisect]
jobs = 4
provisioning_jobs = 16
seed = 1234
link_mode = "hardlink"
abort_on_unexpected = false
capture_output = false
"#;
    std::fs::write(dir.join("config.toml"), config_content).unwrap();

    let config = pbisect_config::Config::load_from(Some(&dir.join("config.toml")), None).unwrap();

    assert_eq!(config.storage.base_path, PathBuf::from("/custom/base"));
    assert_eq!(config.bisect.jobs(), 4);
    assert_eq!(config.bisect.provisioning_jobs(), 16);
    assert_eq!(config.bisect.seed, 1234);
    assert_eq!(config.bisect.link_mode, "hardlink");
    assert!(!config.bisect.abort_on_unexpected);
    assert!(!config.bisect.capture_output);
    assert_eq!(
        config.layout().cas_dir(),
        PathBuf::from("/custom/base/workspace/cas")
    );
}

/// Test config hierarchy: project config overrides global, key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global = temp.path().join("global.toml");
    std::fs::write(
        &global,
        r#"
[storage]
base_path = "/global/base"

[bisect]
seed = 5
link_mode = "hardlink"
"#,
    )
    .unwrap();

    let project = temp.path().join("project.toml");
    std::fs::write(
        &project,
        r#"
[bisect]
link_mode = "symlink"
"#,
    )
    .unwrap();

    let config = pbisect_config::Config::load_from(Some(&global), Some(&project)).unwrap();
    assert_eq!(config.storage.base_path, PathBuf::from("/global/base"));
    assert_eq!(config.bisect.seed, 5);
    assert_eq!(config.bisect.link_mode, "symlink");
}

/// Invalid TOML surfaces as a parse error instead of silently using defaults
#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[bisect\njobs = ").unwrap();

    let err = pbisect_config::Config::load_from(Some(&path), None).unwrap_err();
    assert!(matches!(err, pbisect_config::ConfigError::Toml(_)));
}

/// Wrong value types are rejected
#[test]
fn test_wrong_type_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("typed.toml");
    std::fs::write(&path, "[bisect]\nseed = \"not a number\"\n").unwrap();

    assert!(pbisect_config::Config::load_from(Some(&path), None).is_err());
}

/// The default TOML parses back to the defaults
#[test]
fn test_default_toml_parses() {
    let toml_str = pbisect_config::Config::default_toml();
    let parsed: pbisect_config::Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.bisect.seed, pbisect_config::DEFAULT_SEED);
    assert_eq!(
        parsed.bisect.progress_interval_ms,
        pbisect_config::DEFAULT_PROGRESS_INTERVAL_MS
    );
}
