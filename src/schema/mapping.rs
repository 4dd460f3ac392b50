//! Key mapping tables.
//!
//! # Responsibilities
//! - Map absolute store keys to logical names
//! - Map logical names to environment variable names
//! - Own the subscription prefix the store keys live under
//!
//! # Design Decisions
//! - Immutable after construction (shared via Arc without locks)
//! - BTreeMap storage so iteration order (and therefore logs and snapshots) is stable
//! - Duplicates are rejected at build time, not silently overwritten

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Errors detected while building a [`KeyMapping`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("store key '{0}' is mapped more than once")]
    DuplicateStoreKey(String),

    #[error("logical name '{name}' is mapped from both '{first}' and '{second}'")]
    DuplicateLogicalName {
        name: String,
        first: String,
        second: String,
    },

    #[error("logical name '{0}' has more than one environment variable")]
    DuplicateEnvVar(String),

    #[error("store key '{key}' lies outside prefix '{prefix}'")]
    OutsidePrefix { key: String, prefix: String },
}

/// Bidirectional store-key / logical-name / env-var tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapping {
    prefix: String,
    store_to_logical: BTreeMap<String, String>,
    logical_to_env: BTreeMap<String, String>,
}

impl KeyMapping {
    /// Start building a mapping whose store keys live under `prefix`.
    pub fn builder(prefix: impl Into<String>) -> KeyMappingBuilder {
        KeyMappingBuilder {
            prefix: prefix.into(),
            store: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Normalize a root key and optionally nest it under the `/dev` namespace.
    ///
    /// `"APPS/Svc/"` becomes `"/APPS/Svc"`, or `"/dev/APPS/Svc"` with `dev` set.
    /// An empty or missing root falls back to `default_root`.
    pub fn prefix_for(root: Option<&str>, default_root: &str, dev: bool) -> String {
        let root = root
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(default_root)
            .trim();
        let mut normalized = if root.starts_with('/') {
            root.to_string()
        } else {
            format!("/{}", root)
        };
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        if dev {
            format!("/dev{}", normalized)
        } else {
            normalized
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Logical name for an absolute store key.
    pub fn logical_for(&self, store_key: &str) -> Option<&str> {
        self.store_to_logical.get(store_key).map(String::as_str)
    }

    /// Environment variable backing a logical name.
    pub fn env_var_for(&self, name: &str) -> Option<&str> {
        self.logical_to_env.get(name).map(String::as_str)
    }

    /// `(store key, logical name)` pairs in key order.
    pub fn store_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.store_to_logical
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `(logical name, env var)` pairs in name order.
    pub fn env_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.logical_to_env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn store_keys(&self) -> impl Iterator<Item = &str> {
        self.store_to_logical.keys().map(String::as_str)
    }

    pub fn store_key_count(&self) -> usize {
        self.store_to_logical.len()
    }

    pub fn env_var_count(&self) -> usize {
        self.logical_to_env.len()
    }

    /// Every logical name known to either table.
    pub fn logical_names(&self) -> BTreeSet<&str> {
        self.store_to_logical
            .values()
            .map(String::as_str)
            .chain(self.logical_to_env.keys().map(String::as_str))
            .collect()
    }
}

/// Builder for [`KeyMapping`].
#[derive(Debug, Clone)]
pub struct KeyMappingBuilder {
    prefix: String,
    store: Vec<(String, String)>,
    env: Vec<(String, String)>,
}

impl KeyMappingBuilder {
    /// Map `<prefix>/<suffix>` to `name`.
    pub fn key(self, suffix: &str, name: impl Into<String>) -> Self {
        let key = format!("{}/{}", self.prefix, suffix.trim_start_matches('/'));
        self.absolute_key(key, name)
    }

    /// Map an absolute store key to `name`.
    pub fn absolute_key(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.store.push((key.into(), name.into()));
        self
    }

    /// Back `name` with environment variable `var`.
    pub fn env(mut self, name: impl Into<String>, var: impl Into<String>) -> Self {
        self.env.push((name.into(), var.into()));
        self
    }

    pub fn build(self) -> Result<KeyMapping, MappingError> {
        let mut store_to_logical = BTreeMap::new();
        let mut seen_names: BTreeMap<String, String> = BTreeMap::new();
        for (key, name) in self.store {
            if !key.starts_with(&self.prefix) {
                return Err(MappingError::OutsidePrefix {
                    key,
                    prefix: self.prefix,
                });
            }
            if store_to_logical.contains_key(&key) {
                return Err(MappingError::DuplicateStoreKey(key));
            }
            if let Some(first) = seen_names.get(&name) {
                return Err(MappingError::DuplicateLogicalName {
                    name,
                    first: first.clone(),
                    second: key,
                });
            }
            seen_names.insert(name.clone(), key.clone());
            store_to_logical.insert(key, name);
        }

        let mut logical_to_env = BTreeMap::new();
        for (name, var) in self.env {
            if logical_to_env.contains_key(&name) {
                return Err(MappingError::DuplicateEnvVar(name));
            }
            logical_to_env.insert(name, var);
        }

        Ok(KeyMapping {
            prefix: self.prefix,
            store_to_logical,
            logical_to_env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(KeyMapping::prefix_for(Some("APPS/Svc/"), "/X", false), "/APPS/Svc");
        assert_eq!(KeyMapping::prefix_for(Some(" /APPS/Svc "), "/X", true), "/dev/APPS/Svc");
        assert_eq!(KeyMapping::prefix_for(None, "/APPS/ControlUnit", false), "/APPS/ControlUnit");
        assert_eq!(KeyMapping::prefix_for(Some("  "), "/APPS/ControlUnit", true), "/dev/APPS/ControlUnit");
    }

    #[test]
    fn test_builder_and_lookups() {
        let mapping = KeyMapping::builder("/A")
            .key("Port", "port")
            .key("/Name", "name")
            .env("port", "PORT")
            .env("region", "REGION")
            .build()
            .unwrap();

        assert_eq!(mapping.prefix(), "/A");
        assert_eq!(mapping.logical_for("/A/Port"), Some("port"));
        assert_eq!(mapping.logical_for("/A/Name"), Some("name"));
        assert_eq!(mapping.logical_for("/A/Other"), None);
        assert_eq!(mapping.env_var_for("region"), Some("REGION"));
        assert_eq!(mapping.store_key_count(), 2);

        let names: Vec<_> = mapping.logical_names().into_iter().collect();
        assert_eq!(names, vec!["name", "port", "region"]);
    }

    #[test]
    fn test_duplicates_rejected() {
        let err = KeyMapping::builder("/A")
            .key("Port", "port")
            .key("Port", "other")
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::DuplicateStoreKey("/A/Port".into()));

        let err = KeyMapping::builder("/A")
            .key("Port", "port")
            .key("Port2", "port")
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateLogicalName { .. }));

        let err = KeyMapping::builder("/A")
            .env("port", "PORT")
            .env("port", "PORT2")
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::DuplicateEnvVar("port".into()));
    }

    #[test]
    fn test_key_outside_prefix_rejected() {
        let err = KeyMapping::builder("/A")
            .absolute_key("/B/Port", "port")
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::OutsidePrefix { .. }));
    }
}
