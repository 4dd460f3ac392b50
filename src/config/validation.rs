//! Settings validation.
//!
//! # Responsibilities
//! - Semantic checks serde cannot express
//! - Endpoint shape (scheme, host, port) when the store is in use
//! - Interval ranges and credential pairing
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure functions: `&Settings -> Result<(), Vec<ValidationError>>`

use std::fmt;

use crate::config::schema::Settings;
use crate::store::Endpoint;

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `watch.stale_after_secs`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `settings` for values that would make the cache unusable.
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let store = &settings.store;

    if !store.use_local_config {
        match store.endpoint.as_deref() {
            None => errors.push(ValidationError::new(
                "store.endpoint",
                "required unless use_local_config is set",
            )),
            Some(raw) => {
                if let Err(e) = Endpoint::parse(raw) {
                    errors.push(ValidationError::new("store.endpoint", e.to_string()));
                }
            }
        }
    }
    check_runtime(settings, &mut errors);
    into_result(errors)
}

/// Checks that hold whether or not an endpoint is configured yet.
///
/// A missing endpoint is left to the first load, which reports it as a
/// configuration error.
pub fn validate_runtime_settings(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_runtime(settings, &mut errors);
    into_result(errors)
}

fn check_runtime(settings: &Settings, errors: &mut Vec<ValidationError>) {
    let store = &settings.store;
    if store.username.is_some() != store.password.is_some() {
        errors.push(ValidationError::new(
            "store.username",
            "username and password must be set together",
        ));
    }
    if store.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("store.connect_timeout_secs", "must be > 0"));
    }

    let watch = &settings.watch;
    if watch.check_interval_secs == 0 {
        errors.push(ValidationError::new("watch.check_interval_secs", "must be > 0"));
    }
    if watch.stale_after_secs == 0 {
        errors.push(ValidationError::new("watch.stale_after_secs", "must be > 0"));
    }
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> Settings {
        let mut settings = Settings::default();
        settings.store.endpoint = Some("http://127.0.0.1:2379".into());
        settings
    }

    #[test]
    fn test_valid_remote() {
        assert!(validate_settings(&remote()).is_ok());
    }

    #[test]
    fn test_local_needs_no_endpoint() {
        let mut settings = Settings::default();
        settings.store.use_local_config = true;
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut settings = Settings::default();
        settings.store.username = Some("svc".into());
        settings.watch.check_interval_secs = 0;
        settings.watch.stale_after_secs = 0;

        let errors = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "store.endpoint",
                "store.username",
                "watch.check_interval_secs",
                "watch.stale_after_secs"
            ]
        );
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let mut settings = remote();
        settings.store.endpoint = Some("ftp://etcd:2379".into());
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors[0].field, "store.endpoint");
    }

    #[test]
    fn test_runtime_checks_skip_endpoint() {
        assert!(validate_runtime_settings(&Settings::default()).is_ok());

        let mut settings = Settings::default();
        settings.watch.check_interval_secs = 0;
        let errors = validate_runtime_settings(&settings).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "watch.check_interval_secs");
    }
}
