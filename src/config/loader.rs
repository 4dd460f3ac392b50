//! Settings loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::env::EnvSource;
use crate::config::schema::Settings;
use crate::config::validation::{validate_settings, ValidationError};

/// Error type for settings loading.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse settings from TOML text, overlay the environment, and validate.
pub fn parse_settings(content: &str, env: &dyn EnvSource) -> Result<Settings, SettingsError> {
    let mut settings: Settings = toml::from_str(content)?;
    settings.apply_env(env);
    validate_settings(&settings).map_err(SettingsError::Validation)?;
    Ok(settings)
}

/// Read an optional TOML file and overlay the environment, without validating.
///
/// For callers that layer further overrides (such as command-line flags) before
/// calling [`validate_settings`] themselves.
pub fn read_settings(path: Option<&Path>, env: &dyn EnvSource) -> Result<Settings, SettingsError> {
    let content = match path {
        Some(path) => fs::read_to_string(path)?,
        None => String::new(),
    };
    let mut settings: Settings = toml::from_str(&content)?;
    settings.apply_env(env);
    Ok(settings)
}

/// Load settings from an optional TOML file.
///
/// Without a file the defaults are used. Environment variables always win over
/// file values.
pub fn load_settings(path: Option<&Path>, env: &dyn EnvSource) -> Result<Settings, SettingsError> {
    let settings = read_settings(path, env)?;
    validate_settings(&settings).map_err(SettingsError::Validation)?;
    Ok(settings)
}
