//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber behind a reloadable filter
//! - Translate store-style level names (`WARNING`, `CRITICAL`) to filter directives
//! - Reconfigure log levels at runtime when level keys change in the store
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - The filter layer is wrapped in `reload::Layer` so levels change without restarts
//! - Level names that cannot be parsed fall back to the configured default

use thiserror::Error;
use tracing_subscriber::{
    filter::ParseError, layer::SubscriberExt, reload, util::SubscriberInitExt,
    util::TryInitError, EnvFilter, Registry,
};

use crate::cache::ConfigSnapshot;

/// Errors from logging setup or reconfiguration.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid filter directive: {0}")]
    Filter(#[from] ParseError),

    #[error("subscriber already installed: {0}")]
    Init(#[from] TryInitError),

    #[error("filter reload failed: {0}")]
    Reload(#[from] reload::Error),
}

/// Map a level name to a tracing directive level.
///
/// Accepts the names stored alongside service configuration, case-insensitively.
pub fn normalize_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some("trace"),
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" | "FATAL" => Some("error"),
        "OFF" => Some("off"),
        _ => None,
    }
}

/// A per-target level driven by a logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLevel {
    pub target: String,
    pub name: String,
    pub default_level: String,
}

/// Logical names that control logging verbosity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLevelKeys {
    pub level: String,
    pub default_level: String,
    pub targets: Vec<TargetLevel>,
}

impl LogLevelKeys {
    pub fn new(level: impl Into<String>, default_level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            default_level: default_level.into(),
            targets: Vec::new(),
        }
    }

    /// Add a target whose level comes from logical name `name`.
    pub fn with_target(
        mut self,
        target: impl Into<String>,
        name: impl Into<String>,
        default_level: impl Into<String>,
    ) -> Self {
        self.targets.push(TargetLevel {
            target: target.into(),
            name: name.into(),
            default_level: default_level.into(),
        });
        self
    }

    /// Whether a change to `name` affects logging.
    pub fn controls(&self, name: &str) -> bool {
        self.level == name || self.targets.iter().any(|t| t.name == name)
    }

    /// Build an `EnvFilter` directive such as `debug,sqlx=warn` from cached values.
    pub fn directive(&self, snapshot: &ConfigSnapshot) -> String {
        let level = |name: &str, default: &str| {
            snapshot
                .get_str(name)
                .and_then(normalize_level)
                .or_else(|| normalize_level(default))
                .unwrap_or("info")
        };

        let mut directive = level(&self.level, &self.default_level).to_string();
        for target in &self.targets {
            directive.push(',');
            directive.push_str(&target.target);
            directive.push('=');
            directive.push_str(level(&target.name, &target.default_level));
        }
        directive
    }
}

/// Runtime log reconfiguration hook used by the event router.
pub trait LogReconfigure: Send + Sync {
    fn reconfigure(&self, directive: &str) -> Result<(), LoggingError>;
}

/// Handle to the installed subscriber's reloadable filter.
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogReconfigure for LogLevelHandle {
    fn reconfigure(&self, directive: &str) -> Result<(), LoggingError> {
        let filter = EnvFilter::try_new(directive)?;
        self.handle.reload(filter)?;
        Ok(())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_directive` when set.
pub fn init_logging(default_directive: &str) -> Result<LogLevelHandle, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)?,
    };
    let (filter_layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(LogLevelHandle { handle })
}
