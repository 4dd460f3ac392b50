//! Settings schema definitions.
//!
//! Every section derives Serde traits so it can be read from a TOML file,
//! and every field has a default so an empty file is valid.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::env::{
    EnvSource, ENV_CA_CERT_PATH, ENV_DEV, ENV_ENDPOINT, ENV_PASSWORD, ENV_ROOT_KEY, ENV_USERNAME,
    ENV_USE_LOCAL_CONFIG,
};
use crate::store::{ConnectOptions, Credentials, Endpoint, StoreError};

/// Root settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Store connection and mode switches.
    pub store: StoreSettings,

    /// Subscription liveness tuning.
    pub watch: WatchSettings,

    /// Bulk load policy.
    pub load: LoadSettings,
}

impl Settings {
    /// Defaults overlaid with the process-level environment switches.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let mut settings = Self::default();
        settings.apply_env(env);
        settings
    }

    /// Overwrite fields whose environment variable is set and non-empty.
    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        let store = &mut self.store;
        if let Some(v) = env.get_non_empty(ENV_ENDPOINT) {
            store.endpoint = Some(v);
        }
        if let Some(v) = env.get_non_empty(ENV_USERNAME) {
            store.username = Some(v);
        }
        if let Some(v) = env.get_non_empty(ENV_PASSWORD) {
            store.password = Some(v);
        }
        if let Some(v) = env.get_non_empty(ENV_ROOT_KEY) {
            store.root_key = Some(v);
        }
        if let Some(v) = env.get_non_empty(ENV_CA_CERT_PATH) {
            store.ca_cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get_flag(ENV_DEV) {
            store.dev = v;
        }
        if let Some(v) = env.get_flag(ENV_USE_LOCAL_CONFIG) {
            store.use_local_config = v;
        }
    }
}

/// Store connection settings.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    /// Endpoint URL (e.g., "https://etcd.example.com:2379").
    pub endpoint: Option<String>,

    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Root key all application keys live under.
    pub root_key: Option<String>,

    /// CA bundle for https endpoints.
    pub ca_cert_path: Option<PathBuf>,

    /// Read values from environment variables instead of the store.
    pub use_local_config: bool,

    /// Nest every key under `/dev`.
    pub dev: bool,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            root_key: None,
            ca_cert_path: None,
            use_local_config: false,
            dev: false,
            connect_timeout_secs: 5,
        }
    }
}

impl StoreSettings {
    /// Credentials, when both username and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Parsed endpoint, or the reason it cannot be used.
    pub fn endpoint(&self) -> Result<Endpoint, StoreError> {
        match self.endpoint.as_deref() {
            Some(raw) => Endpoint::parse(raw),
            None => Err(StoreError::NotConfigured),
        }
    }

    /// Connection options without credentials; auth is layered on by the connection.
    pub fn connect_options(&self) -> Result<ConnectOptions, StoreError> {
        Ok(ConnectOptions {
            endpoint: self.endpoint()?,
            ca_cert_path: self.ca_cert_path.clone(),
            auth: None,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("root_key", &self.root_key)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("use_local_config", &self.use_local_config)
            .field("dev", &self.dev)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Liveness check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchSettings {
    /// How often the liveness task wakes up, in seconds.
    pub check_interval_secs: u64,

    /// Silence longer than this restarts the subscription, in seconds.
    pub stale_after_secs: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            stale_after_secs: 600,
        }
    }
}

impl WatchSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Bulk load policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadSettings {
    /// In store mode, report failure unless every mapped key resolved.
    pub require_all_keys: bool,

    /// In store mode, fill keys missing from the store from their environment variables.
    pub env_defaults: bool,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            require_all_keys: true,
            env_defaults: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::MapEnv;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.watch.check_interval(), Duration::from_secs(300));
        assert_eq!(settings.watch.stale_after(), Duration::from_secs(600));
        assert!(settings.load.require_all_keys);
        assert!(!settings.store.use_local_config);
        assert_eq!(settings.store.endpoint(), Err(StoreError::NotConfigured));
    }

    #[test]
    fn test_env_overlay() {
        let env = MapEnv::new()
            .with(ENV_ENDPOINT, "https://etcd.example.com:2379")
            .with(ENV_USERNAME, "svc")
            .with(ENV_PASSWORD, "secret")
            .with(ENV_ROOT_KEY, "/APPS/Svc")
            .with(ENV_DEV, "True")
            .with(ENV_USE_LOCAL_CONFIG, "false");
        let settings = Settings::from_env(&env);

        assert_eq!(settings.store.endpoint.as_deref(), Some("https://etcd.example.com:2379"));
        assert_eq!(settings.store.root_key.as_deref(), Some("/APPS/Svc"));
        assert!(settings.store.dev);
        assert!(!settings.store.use_local_config);
        assert_eq!(settings.store.credentials().unwrap().username, "svc");
        assert!(settings.store.connect_options().unwrap().endpoint.is_tls());
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let store = StoreSettings {
            username: Some("svc".into()),
            ..StoreSettings::default()
        };
        assert!(store.credentials().is_none());
    }

    #[test]
    fn test_debug_hides_password() {
        let store = StoreSettings {
            password: Some("hunter2".into()),
            ..StoreSettings::default()
        };
        assert!(!format!("{:?}", store).contains("hunter2"));
    }
}
