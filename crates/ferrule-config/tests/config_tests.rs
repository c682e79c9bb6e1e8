//! Configuration loading and precedence tests

use ferrule_config::{ConfigError, ConfigLoader, GlobalConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("config.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
fn test_load_full_config() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[libraries]
search_paths = ["/opt/vendor/lib", "/usr/local/lib"]
default_flags = ["now", "global"]

[logging]
level = "debug"
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    let config = GlobalConfig::load_from_file(&config_path).unwrap();
    assert_eq!(config.search_paths().len(), 2);
    assert_eq!(
        config.default_flags(),
        Some(&["now".to_string(), "global".to_string()][..])
    );
    assert_eq!(config.log_level(), Some("debug"));
}

#[test]
fn test_load_empty_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_config_file(temp_dir.path(), "");

    let config = GlobalConfig::load_from_file(&config_path).unwrap();
    assert!(config.search_paths().is_empty());
    assert_eq!(config.default_flags(), None);
    assert_eq!(config.log_level(), None);
}

#[test]
fn test_missing_file_reports_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("config.toml");

    let err = GlobalConfig::load_from_file(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

// ============================================================================
// Invalid Config Tests
// ============================================================================

#[test]
fn test_invalid_toml_syntax_names_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_config_file(temp_dir.path(), "[libraries\nbroken");

    let err = GlobalConfig::load_from_file(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParseError { .. }));
    assert!(err.to_string().contains("config.toml"));
}

#[test]
fn test_unknown_open_flag_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[libraries]
default_flags = ["eager"]
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    let err = GlobalConfig::load_from_file(&config_path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert!(err.to_string().contains("eager"));
}

#[test]
fn test_unknown_log_level_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[logging]
level = "shouting"
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    let err = GlobalConfig::load_from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("unknown log level 'shouting'"));
}

#[test]
fn test_misspelled_section_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[libraries]
search_pathz = ["/oops"]
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    assert!(GlobalConfig::load_from_file(&config_path).is_err());
}

// ============================================================================
// Environment Precedence Tests
// ============================================================================

#[test]
#[serial_test::serial]
fn test_env_search_paths_come_first() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[libraries]
search_paths = ["/opt/vendor/lib"]
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    let joined = env::join_paths([PathBuf::from("/env/a"), PathBuf::from("/env/b")]).unwrap();
    env::set_var("FERRULE_LIBRARY_PATH", &joined);

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_file(&config_path).unwrap();
    assert_eq!(
        config.library_search_paths(),
        &[
            PathBuf::from("/env/a"),
            PathBuf::from("/env/b"),
            PathBuf::from("/opt/vendor/lib"),
        ]
    );

    env::remove_var("FERRULE_LIBRARY_PATH");
}

#[test]
#[serial_test::serial]
fn test_env_log_level_overrides_config() {
    let temp_dir = TempDir::new().unwrap();
    let content = r#"
[logging]
level = "info"
"#;
    let config_path = create_config_file(temp_dir.path(), content);

    env::set_var("FERRULE_LOG", "trace");
    let mut loader = ConfigLoader::new();
    let config = loader.load_from_file(&config_path).unwrap();
    assert_eq!(config.log_level(), "trace");
    env::remove_var("FERRULE_LOG");

    let config = loader.load_from_file(&config_path).unwrap();
    assert_eq!(config.log_level(), "info");
}

#[test]
#[serial_test::serial]
fn test_defaults_without_any_source() {
    env::remove_var("FERRULE_LOG");
    env::remove_var("FERRULE_LIBRARY_PATH");

    let temp_dir = TempDir::new().unwrap();
    let config_path = create_config_file(temp_dir.path(), "");

    let mut loader = ConfigLoader::new();
    let config = loader.load_from_file(&config_path).unwrap();
    assert_eq!(config.log_level(), "warn");
    assert!(config.library_search_paths().is_empty());
    assert_eq!(config.default_open_flags(), None);
}
