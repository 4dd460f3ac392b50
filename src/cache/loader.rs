//! Bulk load of every mapped value.
//!
//! # Responsibilities
//! - Local mode: read each logical name from its environment variable
//! - Store mode: read every mapped store key, then resolve each logical name as
//!   store value, caller default, or (optionally) environment variable
//! - Coerce every resolved value; a rejected value falls back to its absent default
//! - Report how many names resolved and whether that meets the success policy
//!
//! # Design Decisions
//! - The loader never writes to the cache; the caller decides between replace and seed
//! - A partial load still produces a full snapshot (one entry per logical name)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::cache::snapshot::ConfigSnapshot;
use crate::config::{EnvSource, LoadSettings};
use crate::observability::metrics;
use crate::schema::{Schema, Value};
use crate::store::{StoreConnection, StoreError};

/// Hard load failures. Partial loads are reported through [`LoadReport`] instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// Required connection settings are missing or malformed.
    #[error("store configuration invalid: {0}")]
    Configuration(#[source] StoreError),
}

/// Where a load read its values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Store,
    Local,
}

impl LoadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadSource::Store => "store",
            LoadSource::Local => "local",
        }
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub source: LoadSource,
    /// Logical names the load was expected to resolve.
    pub expected: usize,
    /// Expected names that resolved to a value.
    pub loaded: usize,
    /// Expected names that did not resolve.
    pub missing: Vec<String>,
    /// Names whose value was rejected by coercion and replaced by the absent default.
    pub rejected: Vec<String>,
    pub success: bool,
}

/// Reads a complete snapshot from the store or the environment.
pub struct BulkLoader {
    schema: Schema,
    connection: Arc<StoreConnection>,
    env: Arc<dyn EnvSource>,
    settings: LoadSettings,
    defaults: BTreeMap<String, String>,
}

impl BulkLoader {
    pub fn new(
        schema: Schema,
        connection: Arc<StoreConnection>,
        env: Arc<dyn EnvSource>,
        settings: LoadSettings,
    ) -> Self {
        Self {
            schema,
            connection,
            env,
            settings,
            defaults: BTreeMap::new(),
        }
    }

    /// Raw values used when the store has nothing for a logical name.
    pub fn with_defaults(mut self, defaults: BTreeMap<String, String>) -> Self {
        self.defaults = defaults;
        self
    }

    fn local_mode(&self) -> bool {
        self.connection.settings().use_local_config
    }

    /// Run one load. Nothing is written to the cache.
    pub async fn load(&self) -> Result<(ConfigSnapshot, LoadReport), LoadError> {
        let result = if self.local_mode() {
            Ok(self.load_local())
        } else {
            self.load_store().await
        };

        if let Ok((snapshot, report)) = &result {
            metrics::record_load(report.source.as_str(), report.success, report.loaded);
            if report.success {
                tracing::info!(
                    source = %report.source,
                    loaded = report.loaded,
                    expected = report.expected,
                    keys = snapshot.len(),
                    "Configuration loaded"
                );
            } else {
                tracing::warn!(
                    source = %report.source,
                    loaded = report.loaded,
                    expected = report.expected,
                    missing = ?report.missing,
                    "Configuration partially loaded"
                );
            }
        }
        result
    }

    fn load_local(&self) -> (ConfigSnapshot, LoadReport) {
        let mapping = self.schema.mapping();
        let mut raw = BTreeMap::new();
        let mut missing = Vec::new();

        for (name, var) in mapping.env_entries() {
            match self.env.get(var) {
                Some(value) => {
                    raw.insert(name.to_string(), value);
                }
                None => missing.push(name.to_string()),
            }
        }

        let loaded = raw.len();
        let (snapshot, rejected) = self.coerce_all(&raw);
        let report = LoadReport {
            source: LoadSource::Local,
            expected: mapping.env_var_count(),
            loaded,
            missing,
            rejected,
            success: true,
        };
        (snapshot, report)
    }

    async fn load_store(&self) -> Result<(ConfigSnapshot, LoadReport), LoadError> {
        self.connection.settings().endpoint().map_err(|e| {
            tracing::error!(error = %e, "Store connection settings not configured");
            LoadError::Configuration(e)
        })?;

        let mapping = self.schema.mapping();
        let values = self.connection.get(mapping.store_keys()).await;

        let mut from_store: BTreeMap<&str, String> = BTreeMap::new();
        for (key, name) in mapping.store_entries() {
            if let Some(Some(value)) = values.get(key) {
                from_store.insert(name, value.clone());
            }
        }

        let mut raw = BTreeMap::new();
        for name in mapping.logical_names() {
            let value = from_store
                .get(name)
                .cloned()
                .or_else(|| self.defaults.get(name).cloned())
                .or_else(|| self.env_default(name));
            if let Some(value) = value {
                raw.insert(name.to_string(), value);
            }
        }

        let expected: BTreeSet<&str> = mapping.store_entries().map(|(_, name)| name).collect();
        let missing: Vec<String> = expected
            .iter()
            .filter(|name| !raw.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        let loaded = expected.len() - missing.len();
        let success = if self.settings.require_all_keys {
            loaded > 0 && loaded == expected.len()
        } else {
            loaded > 0
        };

        let (snapshot, rejected) = self.coerce_all(&raw);
        let report = LoadReport {
            source: LoadSource::Store,
            expected: expected.len(),
            loaded,
            missing,
            rejected,
            success,
        };
        Ok((snapshot, report))
    }

    fn env_default(&self, name: &str) -> Option<String> {
        if !self.settings.env_defaults {
            return None;
        }
        let var = self.schema.mapping().env_var_for(name)?;
        self.env.get(var)
    }

    /// One entry per logical name; unresolved names get their coerced-absent value.
    fn coerce_all(&self, raw: &BTreeMap<String, String>) -> (ConfigSnapshot, Vec<String>) {
        let mut snapshot = ConfigSnapshot::new();
        let mut rejected = Vec::new();

        for name in self.schema.mapping().logical_names() {
            let value = raw.get(name).map(String::as_str);
            let typed = match self.schema.coerce(name, value) {
                Ok(typed) => typed,
                Err(e) => {
                    metrics::record_coercion_failure(name);
                    tracing::error!(name = %name, error = %e, "Rejected configuration value, using default");
                    rejected.push(name.to_string());
                    self.schema.coerce(name, None).unwrap_or(Value::Null)
                }
            };
            snapshot.insert(name, typed);
        }
        (snapshot, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapEnv, StoreSettings};
    use crate::schema::{CoercionTable, KeyMapping, Rule};
    use crate::store::MemoryStore;

    fn schema() -> Schema {
        let mapping = KeyMapping::builder("/A")
            .key("Debug", "debug")
            .key("Name", "name")
            .env("debug", "APP_DEBUG")
            .env("name", "APP_NAME")
            .env("region", "APP_REGION")
            .build()
            .unwrap();
        let table = CoercionTable::new()
            .with("debug", Rule::bool())
            .with("port", Rule::int_in(5432, 1024, 65535));
        Schema::new(mapping, table)
    }

    fn remote() -> StoreSettings {
        StoreSettings {
            endpoint: Some("http://127.0.0.1:2379".into()),
            ..StoreSettings::default()
        }
    }

    fn loader(store: MemoryStore, settings: StoreSettings, env: MapEnv) -> BulkLoader {
        let connection = Arc::new(StoreConnection::new(Arc::new(store), settings));
        BulkLoader::new(schema(), connection, Arc::new(env), LoadSettings::default())
    }

    #[tokio::test]
    async fn test_full_remote_load() {
        let store = MemoryStore::with_entries([("/A/Debug", "yes"), ("/A/Name", "svc1")]);
        let (snapshot, report) = loader(store, remote(), MapEnv::new()).load().await.unwrap();

        assert!(report.success);
        assert_eq!(report.expected, 2);
        assert_eq!(snapshot.get_bool("debug"), Some(true));
        assert_eq!(snapshot.get_str("name"), Some("svc1"));
        // env-only names are present at their absent value
        assert_eq!(snapshot.get("region"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_partial_remote_load() {
        let store = MemoryStore::with_entries([("/A/Debug", "yes"), ("/A/Name", "svc1")]);
        store.fail_key("/A/Debug");
        let (snapshot, report) = loader(store, remote(), MapEnv::new()).load().await.unwrap();

        assert!(!report.success);
        assert_eq!(report.missing, vec!["debug".to_string()]);
        assert_eq!(snapshot.get_bool("debug"), Some(false));
        assert_eq!(snapshot.get_str("name"), Some("svc1"));
    }

    #[tokio::test]
    async fn test_relaxed_policy_accepts_partial() {
        let store = MemoryStore::with_entries([("/A/Name", "svc1")]);
        let connection = Arc::new(StoreConnection::new(Arc::new(store), remote()));
        let settings = LoadSettings {
            require_all_keys: false,
            ..LoadSettings::default()
        };
        let loader = BulkLoader::new(schema(), connection, Arc::new(MapEnv::new()), settings);
        let (_, report) = loader.load().await.unwrap();
        assert!(report.success);
        assert_eq!(report.loaded, 1);
    }

    #[tokio::test]
    async fn test_defaults_fill_missing_keys() {
        let store = MemoryStore::with_entries([("/A/Name", "svc1")]);
        let loader = loader(store, remote(), MapEnv::new())
            .with_defaults(BTreeMap::from([("debug".to_string(), "on".to_string())]));
        let (snapshot, report) = loader.load().await.unwrap();
        assert!(report.success);
        assert_eq!(snapshot.get_bool("debug"), Some(true));
    }

    #[tokio::test]
    async fn test_env_defaults_when_enabled() {
        let store = MemoryStore::with_entries([("/A/Name", "svc1")]);
        let connection = Arc::new(StoreConnection::new(Arc::new(store), remote()));
        let env = MapEnv::new().with("APP_DEBUG", "1").with("APP_REGION", "eu");
        let settings = LoadSettings {
            env_defaults: true,
            ..LoadSettings::default()
        };
        let loader = BulkLoader::new(schema(), connection, Arc::new(env), settings);
        let (snapshot, report) = loader.load().await.unwrap();
        assert!(report.success);
        assert_eq!(snapshot.get_bool("debug"), Some(true));
        assert_eq!(snapshot.get_str("region"), Some("eu"));
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_fast() {
        let store = MemoryStore::new();
        let err = loader(store.clone(), StoreSettings::default(), MapEnv::new())
            .load()
            .await
            .unwrap_err();
        assert_eq!(err, LoadError::Configuration(StoreError::NotConfigured));
        assert_eq!(store.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_local_mode_always_succeeds() {
        let settings = StoreSettings {
            use_local_config: true,
            ..StoreSettings::default()
        };
        let (snapshot, report) = loader(MemoryStore::new(), settings.clone(), MapEnv::new())
            .load()
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.loaded, 0);
        assert_eq!(snapshot.len(), 3);

        let env = MapEnv::new().with("APP_NAME", "local");
        let (snapshot, report) = loader(MemoryStore::new(), settings, env).load().await.unwrap();
        assert!(report.success);
        assert_eq!(report.loaded, 1);
        assert_eq!(snapshot.get_str("name"), Some("local"));
    }

    #[tokio::test]
    async fn test_rejected_value_uses_default() {
        let mapping = KeyMapping::builder("/A").key("Port", "port").build().unwrap();
        let schema = Schema::new(mapping, CoercionTable::new().with("port", Rule::int_in(5432, 1024, 65535)));
        let store = MemoryStore::with_entries([("/A/Port", "70000")]);
        let connection = Arc::new(StoreConnection::new(Arc::new(store), remote()));
        let loader = BulkLoader::new(schema, connection, Arc::new(MapEnv::new()), LoadSettings::default());

        let (snapshot, report) = loader.load().await.unwrap();
        assert_eq!(snapshot.get_i64("port"), Some(5432));
        assert_eq!(report.rejected, vec!["port".to_string()]);
    }
}
