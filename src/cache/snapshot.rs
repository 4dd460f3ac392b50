//! In-memory configuration snapshot.
//!
//! # Responsibilities
//! - Hold the authoritative map of logical name → typed value
//! - Serialize all reads and writes through one lock
//! - Support whole-snapshot replacement, first-writer seeding, and single-key updates
//!
//! # Design Decisions
//! - Readers always get a copy; nothing hands out references into the lock
//! - The cache never shrinks: a deleted store key is written as its coerced-absent value
//! - A poisoned lock is recovered rather than propagated (the data is plain values)

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::schema::Value;

/// Logical name → typed value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(Value::as_list)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set one entry, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }
}

impl FromIterator<(String, Value)> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Thread-safe holder of the current [`ConfigSnapshot`].
#[derive(Debug, Default)]
pub struct ConfigCache {
    snapshot: Mutex<ConfigSnapshot>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConfigSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.lock().clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Replace everything in one lock acquisition.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.lock() = snapshot;
    }

    /// Install `snapshot` only if nothing has been stored yet.
    ///
    /// Returns whether this call won.
    pub fn seed_if_empty(&self, snapshot: ConfigSnapshot) -> bool {
        let mut guard = self.lock();
        if guard.is_empty() {
            *guard = snapshot;
            true
        } else {
            false
        }
    }

    /// Overwrite exactly one entry, returning its previous value.
    pub fn update(&self, name: &str, value: Value) -> Option<Value> {
        self.lock().insert(name, value)
    }
}
