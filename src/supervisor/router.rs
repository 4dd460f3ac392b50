//! Watch event routing into the cache.
//!
//! # Responsibilities
//! - Stamp the liveness clock for every delivered event
//! - Drop events for keys outside the mapping
//! - Re-read the one affected key, coerce it, and overwrite exactly that entry
//! - Publish changed values and re-apply log levels on every level-key event
//!
//! # Design Decisions
//! - The event payload is never trusted; the current value is always re-read
//! - A rejected value leaves the cached entry untouched

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cache::ConfigCache;
use crate::observability::logging::LogReconfigure;
use crate::observability::metrics;
use crate::schema::{CoercionError, Schema, Value};
use crate::store::{StoreConnection, WatchHandler};
use crate::supervisor::state::LivenessClock;

/// Capacity of the change notification channel.
pub const CHANGE_CAPACITY: usize = 256;

/// One applied update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    pub key: String,
    pub name: String,
    pub previous: Option<Value>,
    pub value: Value,
}

/// What the router did with one event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The key is not mapped.
    Ignored,
    /// The entry was overwritten; `changed` is false when the value was identical.
    Updated {
        name: String,
        value: Value,
        changed: bool,
    },
    /// Coercion rejected the new value; the cache kept the previous one.
    Rejected { name: String, error: CoercionError },
}

/// Applies watch events to a [`ConfigCache`].
pub struct EventRouter {
    schema: Schema,
    connection: Arc<StoreConnection>,
    cache: Arc<ConfigCache>,
    clock: Arc<LivenessClock>,
    changes: broadcast::Sender<ConfigChange>,
    log_reconfigure: Option<Arc<dyn LogReconfigure>>,
}

impl EventRouter {
    pub fn new(
        schema: Schema,
        connection: Arc<StoreConnection>,
        cache: Arc<ConfigCache>,
        clock: Arc<LivenessClock>,
        changes: broadcast::Sender<ConfigChange>,
    ) -> Self {
        Self {
            schema,
            connection,
            cache,
            clock,
            changes,
            log_reconfigure: None,
        }
    }

    pub fn with_log_reconfigure(mut self, hook: Arc<dyn LogReconfigure>) -> Self {
        self.log_reconfigure = Some(hook);
        self
    }

    /// Handle one changed store key.
    pub async fn route(&self, key: &str) -> RouteOutcome {
        self.clock.touch();

        let Some(name) = self.schema.mapping().logical_for(key).map(str::to_string) else {
            metrics::record_watch_event("ignored");
            tracing::trace!(key = %key, "Ignoring unmapped key");
            return RouteOutcome::Ignored;
        };

        let values = self.connection.get([key]).await;
        let raw = values.get(key).cloned().flatten();

        let value = match self.schema.coerce(&name, raw.as_deref()) {
            Ok(value) => value,
            Err(error) => {
                metrics::record_watch_event("rejected");
                metrics::record_coercion_failure(&name);
                tracing::error!(
                    key = %key,
                    name = %name,
                    error = %error,
                    "Rejected configuration update, keeping previous value"
                );
                return RouteOutcome::Rejected { name, error };
            }
        };

        let previous = self.cache.update(&name, value.clone());
        let changed = previous.as_ref() != Some(&value);
        metrics::record_watch_event("applied");
        tracing::info!(key = %key, name = %name, changed, "Configuration value updated");

        if changed {
            let _ = self.changes.send(ConfigChange {
                key: key.to_string(),
                name: name.clone(),
                previous,
                value: value.clone(),
            });
        }
        // level keys re-apply the directive on every event, changed or not
        self.reconfigure_logging(&name);

        RouteOutcome::Updated {
            name,
            value,
            changed,
        }
    }

    fn reconfigure_logging(&self, name: &str) {
        let (Some(keys), Some(hook)) = (self.schema.log_keys(), &self.log_reconfigure) else {
            return;
        };
        if !keys.controls(name) {
            return;
        }
        let directive = keys.directive(&self.cache.snapshot());
        match hook.reconfigure(&directive) {
            Ok(()) => tracing::info!(directive = %directive, "Log levels reconfigured"),
            Err(e) => tracing::warn!(directive = %directive, error = %e, "Log reconfiguration failed"),
        }
    }
}

#[async_trait]
impl WatchHandler for EventRouter {
    async fn on_event(&self, key: &str) {
        self.route(key).await;
    }
}
