//! Configuration loading tests through the public API.

use evo_common::prelude::*;
use serde::Deserialize;
use std::fs;
use tempfile::TempDir;

/// Application config embedding the shared section, as registry processes do.
#[derive(Debug, Deserialize)]
struct ProcessConfig {
    shared: SharedConfig,
    #[serde(default)]
    period_us: u32,
}

impl Validate for ProcessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.period_us == 0 {
            return Err(ConfigError::ValidationError(
                "period_us must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[test]
fn test_load_embedded_shared_section() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtapi.toml");
    fs::write(
        &path,
        r#"
period_us = 1000

[shared]
log_level = "warn"
service_name = "rtapi"
"#,
    )
    .unwrap();

    let config = ProcessConfig::load_validated(&path).unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Warn);
    assert_eq!(config.shared.service_name, "rtapi");
    assert_eq!(config.period_us, 1000);
}

#[test]
fn test_custom_validation_hook_runs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtapi.toml");
    fs::write(
        &path,
        r#"
[shared]
service_name = "rtapi"
"#,
    )
    .unwrap();

    assert!(ProcessConfig::load(&path).is_ok());
    assert!(matches!(
        ProcessConfig::load_validated(&path),
        Err(ConfigError::ValidationError(msg)) if msg.contains("period_us")
    ));
}

#[test]
fn test_missing_shared_section_is_parse_error() {
    let result = ProcessConfig::parse("period_us = 5");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ProcessConfig::load(&dir.path().join("absent.toml")),
        Err(ConfigError::FileNotFound)
    ));
}
