//! Application schema: which keys exist and how their values are typed.
//!
//! # Data Flow
//! ```text
//! application tables
//!     → mapping.rs (store key ↔ logical name ↔ env var)
//!     → coerce.rs (raw string → typed Value)
//!     → Schema (value passed into the cache at construction)
//! ```
//!
//! # Design Decisions
//! - A schema is data, not a subclass: swapping applications means passing a different value
//! - The ControlUnit tables ship as a ready-made schema (control_unit.rs)

pub mod coerce;
pub mod control_unit;
pub mod mapping;

use std::fmt;
use std::sync::Arc;

use crate::observability::logging::LogLevelKeys;

pub use coerce::{Coerce, CoercionError, CoercionTable, Passthrough, Rule, Value};
pub use mapping::{KeyMapping, MappingError};

/// Key tables plus coercion, shared by the loader and the event router.
#[derive(Clone)]
pub struct Schema {
    mapping: Arc<KeyMapping>,
    coercer: Arc<dyn Coerce>,
    log_keys: Option<LogLevelKeys>,
}

impl Schema {
    pub fn new(mapping: KeyMapping, coercer: impl Coerce + 'static) -> Self {
        Self {
            mapping: Arc::new(mapping),
            coercer: Arc::new(coercer),
            log_keys: None,
        }
    }

    /// Schema whose values are all passed through unchanged.
    pub fn passthrough(mapping: KeyMapping) -> Self {
        Self::new(mapping, Passthrough)
    }

    /// Names which, when updated, should reconfigure logging.
    pub fn with_log_keys(mut self, log_keys: LogLevelKeys) -> Self {
        self.log_keys = Some(log_keys);
        self
    }

    pub fn mapping(&self) -> &KeyMapping {
        &self.mapping
    }

    pub fn log_keys(&self) -> Option<&LogLevelKeys> {
        self.log_keys.as_ref()
    }

    pub fn coerce(&self, name: &str, raw: Option<&str>) -> Result<Value, CoercionError> {
        self.coercer.coerce(name, raw)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("prefix", &self.mapping.prefix())
            .field("store_keys", &self.mapping.store_key_count())
            .field("env_vars", &self.mapping.env_var_count())
            .field("log_keys", &self.log_keys)
            .finish()
    }
}
