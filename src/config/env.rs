//! Environment variable access.
//!
//! Process-level switches and local-fallback values are read through [`EnvSource`]
//! so tests can supply a fixed map instead of mutating the process environment.

use std::collections::HashMap;

/// Store endpoint, e.g. `https://etcd.example.com:2379`.
pub const ENV_ENDPOINT: &str = "EtcdSettings__HostName";
pub const ENV_USERNAME: &str = "EtcdSettings__UserName";
pub const ENV_PASSWORD: &str = "EtcdSettings__Password";
/// Root key prefix, e.g. `/APPS/ControlUnit`.
pub const ENV_ROOT_KEY: &str = "EtcdSettings__RootKey";
pub const ENV_CA_CERT_PATH: &str = "EtcdSettings__CaCertPath";
/// `true` nests every key under `/dev`.
pub const ENV_DEV: &str = "EtcdSettings__Dev";
/// `true` reads configuration from environment variables instead of the store.
pub const ENV_USE_LOCAL_CONFIG: &str = "USE_LOCAL_CONFIG";

/// Source of environment variables.
pub trait EnvSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// Value of `name`, treating empty strings as unset.
    fn get_non_empty(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    /// `Some(true)` only for a case-insensitive `true`; `None` when unset.
    fn get_flag(&self, name: &str) -> Option<bool> {
        self.get_non_empty(name)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
