//! Live configuration facade.
//!
//! # Data Flow
//! ```text
//! LiveConfig::builder()
//!     settings + schema + store + env (+ defaults, log hook)
//!     → StoreConnection, ConfigCache, BulkLoader, EventRouter, SubscriptionSupervisor
//!
//! start():    load_initial → ConfigCache::replace → SubscriptionSupervisor::start
//! get_all():  copy of the cache, or a one-shot load seeding an empty cache
//! stop():     SubscriptionSupervisor::stop
//! ```
//!
//! # Design Decisions
//! - Explicit construction; there is no process-wide default instance
//! - In local mode the store defaults to an empty in-memory store that is never contacted

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::cache::{BulkLoader, ConfigCache, ConfigSnapshot, LoadError, LoadReport};
use crate::config::{validate_runtime_settings, EnvSource, ProcessEnv, Settings, SettingsError};
use crate::observability::logging::LogReconfigure;
use crate::schema::{KeyMapping, Schema, Value};
use crate::store::{KvStore, MemoryStore, StoreConnection};
use crate::supervisor::router::CHANGE_CAPACITY;
use crate::supervisor::{
    ConfigChange, EventRouter, LivenessClock, StartOutcome, SubscriptionSupervisor, SupervisorError,
    SupervisorState,
};

#[derive(Debug, Error)]
pub enum LiveConfigError {
    #[error("no schema configured")]
    MissingSchema,

    #[error("no store client configured")]
    MissingStore,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// A configuration cache kept current by a store watch.
pub struct LiveConfig {
    settings: Settings,
    schema: Schema,
    cache: Arc<ConfigCache>,
    loader: BulkLoader,
    supervisor: SubscriptionSupervisor,
    changes: broadcast::Sender<ConfigChange>,
}

impl LiveConfig {
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::default()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mapping(&self) -> &KeyMapping {
        self.schema.mapping()
    }

    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn supervisor(&self) -> &SubscriptionSupervisor {
        &self.supervisor
    }

    /// Applied updates, in the order the router applied them.
    pub fn changes(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Bulk load and replace the whole cache, even when the load was partial.
    pub async fn load_initial(&self) -> Result<LoadReport, LoadError> {
        let (snapshot, report) = self.loader.load().await?;
        self.cache.replace(snapshot);
        Ok(report)
    }

    /// Load, then open the subscription if the load succeeded.
    ///
    /// A partial load is returned as-is without starting the watch. Fails
    /// without touching the cache when live updates are already running.
    pub async fn start(&self) -> Result<LoadReport, LiveConfigError> {
        let state = self.supervisor.state();
        if state != SupervisorState::Stopped {
            return Err(SupervisorError::AlreadyStarted(state).into());
        }

        let report = self.load_initial().await?;
        if !report.success {
            tracing::warn!(
                loaded = report.loaded,
                expected = report.expected,
                "Initial load incomplete, live updates not started"
            );
            return Ok(report);
        }

        match self.supervisor.start(&report).await? {
            StartOutcome::Watching => tracing::info!("Live configuration started"),
            StartOutcome::Degraded => tracing::warn!("Live configuration started without store watcher"),
            StartOutcome::Local => tracing::info!("Live configuration started in local mode"),
        }
        Ok(report)
    }

    /// Stop live updates. Idempotent.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    /// Copy of the current configuration.
    ///
    /// Before any load has populated the cache this performs one load itself and
    /// seeds the cache with it, unless another writer got there first.
    pub async fn get_all(&self) -> ConfigSnapshot {
        let snapshot = self.cache.snapshot();
        if !snapshot.is_empty() {
            return snapshot;
        }

        match self.loader.load().await {
            Ok((loaded, _)) => {
                if !self.cache.seed_if_empty(loaded) {
                    tracing::debug!("Cache populated concurrently, keeping existing snapshot");
                }
                self.cache.snapshot()
            }
            Err(e) => {
                tracing::error!(error = %e, "One-shot configuration load failed");
                self.cache.snapshot()
            }
        }
    }

    /// Current value of one logical name, without triggering a load.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.cache.get(name)
    }
}

/// Explicit wiring for [`LiveConfig`].
#[derive(Default)]
pub struct LiveConfigBuilder {
    settings: Settings,
    schema: Option<Schema>,
    store: Option<Arc<dyn KvStore>>,
    env: Option<Arc<dyn EnvSource>>,
    defaults: BTreeMap<String, String>,
    log_reconfigure: Option<Arc<dyn LogReconfigure>>,
}

impl LiveConfigBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn store(mut self, store: impl KvStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Environment used for local mode and env defaults. Defaults to the process environment.
    pub fn env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Some(Arc::new(env));
        self
    }

    /// Raw value used for `name` when the store has none.
    pub fn default_value(mut self, name: impl Into<String>, raw: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), raw.into());
        self
    }

    /// Hook invoked when a log-level logical name changes.
    pub fn log_reconfigure(mut self, hook: Arc<dyn LogReconfigure>) -> Self {
        self.log_reconfigure = Some(hook);
        self
    }

    pub fn build(self) -> Result<LiveConfig, LiveConfigError> {
        let schema = self.schema.ok_or(LiveConfigError::MissingSchema)?;
        let store: Arc<dyn KvStore> = match self.store {
            Some(store) => store,
            None if self.settings.store.use_local_config => Arc::new(MemoryStore::new()),
            None => return Err(LiveConfigError::MissingStore),
        };
        validate_runtime_settings(&self.settings).map_err(SettingsError::Validation)?;
        let env: Arc<dyn EnvSource> = match self.env {
            Some(env) => env,
            None => Arc::new(ProcessEnv),
        };

        let connection = Arc::new(StoreConnection::new(store, self.settings.store.clone()));
        let cache = Arc::new(ConfigCache::new());
        let clock = Arc::new(LivenessClock::new());
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);

        let loader = BulkLoader::new(
            schema.clone(),
            connection.clone(),
            env,
            self.settings.load.clone(),
        )
        .with_defaults(self.defaults);

        let mut router = EventRouter::new(
            schema.clone(),
            connection.clone(),
            cache.clone(),
            clock.clone(),
            changes.clone(),
        );
        if let Some(hook) = self.log_reconfigure {
            router = router.with_log_reconfigure(hook);
        }

        let supervisor = SubscriptionSupervisor::new(
            connection,
            Arc::new(router),
            schema.mapping().prefix(),
            self.settings.watch.clone(),
            clock,
        );

        Ok(LiveConfig {
            settings: self.settings,
            schema,
            cache,
            loader,
            supervisor,
            changes,
        })
    }
}
