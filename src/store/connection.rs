//! Lazily connected store handle.
//!
//! # Responsibilities
//! - Create the client on first use and reuse it afterwards
//! - Fall back through authentication modes without failing the connection
//! - Read keys one by one, renewing an expired session once per key
//! - Run the prefix watch on a background task and hand back a cancel handle
//!
//! # Design Decisions
//! - The handle lives in an `ArcSwapOption`: dropping it to force a reconnect never blocks
//!   an in-flight read, which simply keeps its old client
//! - Reads never fail as a whole; each key gets a value or an explicit `None`
//! - Watch events are filtered by prefix here, whatever the client delivers

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::config::StoreSettings;
use crate::observability::metrics;
use crate::store::{prefix_range_end, AuthMode, ConnectOptions, KvClient, KvStore, StoreError};

/// Receives the keys of observed mutations.
#[async_trait]
pub trait WatchHandler: Send + Sync + 'static {
    async fn on_event(&self, key: &str);
}

/// Stops a running watch. Cancellation is fire-and-forget and idempotent.
#[derive(Debug)]
pub struct CancelHandle {
    task: AbortHandle,
    cancelled: AtomicBool,
}

impl CancelHandle {
    fn new(task: AbortHandle) -> Self {
        Self {
            task,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Cancel the watch. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.task.abort();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the watch task has exited (cancelled or stream ended).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

struct ClientHandle {
    client: Arc<dyn KvClient>,
}

/// Shared connection to the configured store.
pub struct StoreConnection {
    store: Arc<dyn KvStore>,
    settings: StoreSettings,
    handle: ArcSwapOption<ClientHandle>,
    connect_lock: Mutex<()>,
}

impl StoreConnection {
    pub fn new(store: Arc<dyn KvStore>, settings: StoreSettings) -> Self {
        Self {
            store,
            settings,
            handle: ArcSwapOption::empty(),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.handle.load().is_some()
    }

    /// Drop the cached client so the next call reconnects from scratch.
    pub fn invalidate(&self) {
        if self.handle.swap(None).is_some() {
            tracing::debug!("Store client handle dropped");
        }
    }

    /// Return the cached client, connecting if necessary.
    pub async fn connect(&self) -> Result<Arc<dyn KvClient>, StoreError> {
        if let Some(handle) = self.handle.load_full() {
            return Ok(handle.client.clone());
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(handle) = self.handle.load_full() {
            return Ok(handle.client.clone());
        }

        let options = self.settings.connect_options().map_err(|e| {
            tracing::error!(error = %e, "Store connection settings invalid");
            e
        })?;

        if let Some(ca) = options.ca_cert_path.as_ref().filter(|_| options.endpoint.is_tls()) {
            tracing::info!(ca_cert_path = %ca.display(), "Using TLS for store connection");
        }

        let client = match self.open(&options).await {
            Ok(client) => client,
            Err(e) => {
                metrics::record_connect("failed");
                tracing::error!(endpoint = %options.endpoint, error = %e, "Failed to initialize store client");
                return Err(e);
            }
        };

        let version = match client.version().await {
            Ok(version) => version,
            Err(e) => {
                metrics::record_connect("failed");
                tracing::error!(endpoint = %options.endpoint, error = %e, "Store client verification failed");
                return Err(e);
            }
        };

        metrics::record_connect("connected");
        tracing::debug!(
            endpoint = %options.endpoint,
            host = %options.endpoint.host,
            port = options.endpoint.port,
            scheme = %options.endpoint.scheme,
            version = %version,
            "Store client initialized"
        );

        self.handle.store(Some(Arc::new(ClientHandle {
            client: client.clone(),
        })));
        Ok(client)
    }

    /// Open a client, trying token auth, then basic auth, then no credentials.
    async fn open(&self, options: &ConnectOptions) -> Result<Arc<dyn KvClient>, StoreError> {
        let Some(credentials) = self.settings.credentials() else {
            return self.store.connect(options).await;
        };

        for mode in [AuthMode::Token, AuthMode::Basic] {
            let attempt = ConnectOptions {
                auth: Some((credentials.clone(), mode)),
                ..options.clone()
            };
            match self.store.connect(&attempt).await {
                Ok(client) => {
                    tracing::info!(
                        auth_method = ?mode,
                        username = %credentials.username,
                        "Store client authenticated"
                    );
                    return Ok(client);
                }
                Err(e @ (StoreError::AuthFailed(_) | StoreError::Unsupported(_))) => {
                    tracing::debug!(auth_method = ?mode, error = %e, "Store authentication failed, trying fallback");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            username = %credentials.username,
            "Store authentication unavailable; connecting without credentials"
        );
        self.store.connect(options).await
    }

    /// Read every key, recording `None` for keys that are missing or unreadable.
    pub async fn get<I, K>(&self, keys: I) -> BTreeMap<String, Option<String>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();

        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(keys_requested = keys.len(), error = %e, "Store values retrieval failed");
                return keys.into_iter().map(|k| (k, None)).collect();
            }
        };

        let mut result = BTreeMap::new();
        for key in keys {
            let value = match client.get(&key).await {
                Ok(value) => {
                    metrics::record_key_read(if value.is_some() { "found" } else { "missing" });
                    value
                }
                Err(e) if e.is_auth_expired() => {
                    tracing::warn!(key = %key, "Store auth token expired, reconnecting");
                    self.invalidate();
                    match self.connect().await {
                        Ok(fresh) => {
                            client = fresh;
                            self.retry_read(client.as_ref(), &key).await
                        }
                        Err(e) => {
                            metrics::record_key_read("error");
                            tracing::warn!(key = %key, error = %e, "Store key retrieval failed");
                            None
                        }
                    }
                }
                Err(e) => {
                    metrics::record_key_read("error");
                    tracing::warn!(key = %key, error = %e, "Store key retrieval failed");
                    None
                }
            };
            result.insert(key, value);
        }
        result
    }

    async fn retry_read(&self, client: &dyn KvClient, key: &str) -> Option<String> {
        match client.get(key).await {
            Ok(value) => {
                metrics::record_key_read("retried");
                value
            }
            Err(e) => {
                metrics::record_key_read("error");
                tracing::warn!(key = %key, error = %e, "Store key retrieval failed after reconnect");
                None
            }
        }
    }

    /// Watch every key under `prefix`, delivering each changed key to `handler`.
    ///
    /// Returns `None` when no client can be obtained or the watch is refused.
    pub async fn subscribe(&self, prefix: &str, handler: Arc<dyn WatchHandler>) -> Option<CancelHandle> {
        let client = match self.connect().await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(prefix = %prefix, error = %e, "Store watcher start failed: client not connected");
                return None;
            }
        };

        let range_end = prefix_range_end(prefix.as_bytes());
        let mut stream = match client.watch(prefix, &range_end).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(prefix = %prefix, error = %e, "Store watcher could not be established");
                return None;
            }
        };

        let prefix = prefix.to_string();
        let task = tokio::spawn(async move {
            while let Some(batch) = stream.next().await {
                match batch {
                    Ok(keys) => {
                        for key in keys {
                            if key.is_empty() || !key.starts_with(&prefix) {
                                continue;
                            }
                            tracing::debug!(key = %key, "Store watcher delivering event");
                            handler.on_event(&key).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(prefix = %prefix, error = %e, "Store watch stream error");
                    }
                }
            }
            tracing::debug!(prefix = %prefix, "Store watch stream ended");
        });

        tracing::debug!(range_end = ?String::from_utf8_lossy(&range_end), "Store watch started");
        Some(CancelHandle::new(task.abort_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn settings() -> StoreSettings {
        StoreSettings {
            endpoint: Some("http://127.0.0.1:2379".into()),
            ..StoreSettings::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        keys: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl WatchHandler for Recorder {
        async fn on_event(&self, key: &str) {
            self.keys.lock().unwrap().push(key.to_string());
        }
    }

    #[tokio::test]
    async fn test_connect_is_cached() {
        let store = MemoryStore::new();
        let conn = StoreConnection::new(Arc::new(store.clone()), settings());

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert_eq!(store.connect_count(), 1);

        conn.invalidate();
        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_connect() {
        let conn = StoreConnection::new(Arc::new(MemoryStore::new()), StoreSettings::default());
        assert_eq!(conn.connect().await.err(), Some(StoreError::NotConfigured));
    }

    #[tokio::test]
    async fn test_get_isolates_failing_keys() {
        let store = MemoryStore::new();
        store.put("/A/x", "1");
        store.put("/A/y", "2");
        store.fail_key("/A/x");
        let conn = StoreConnection::new(Arc::new(store), settings());

        let values = conn.get(["/A/x", "/A/y", "/A/z"]).await;
        assert_eq!(values.get("/A/x"), Some(&None));
        assert_eq!(values.get("/A/y"), Some(&Some("2".to_string())));
        assert_eq!(values.get("/A/z"), Some(&None));
    }

    #[tokio::test]
    async fn test_get_when_unreachable_marks_all_absent() {
        let store = MemoryStore::new();
        store.put("/A/x", "1");
        store.set_connect_refused(true);
        let conn = StoreConnection::new(Arc::new(store), settings());

        let values = conn.get(["/A/x", "/A/y"]).await;
        assert_eq!(values.len(), 2);
        assert!(values.values().all(Option::is_none));
    }

    #[tokio::test]
    async fn test_expired_session_reconnects_once() {
        let store = MemoryStore::new();
        store.put("/A/x", "1");
        let conn = StoreConnection::new(Arc::new(store.clone()), settings());
        conn.connect().await.unwrap();

        store.expire_sessions();
        let values = conn.get(["/A/x"]).await;
        assert_eq!(values.get("/A/x"), Some(&Some("1".to_string())));
        assert_eq!(store.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_token_auth_falls_back() {
        let store = MemoryStore::new();
        store.set_token_auth_rejected(true);
        let conn = StoreConnection::new(
            Arc::new(store.clone()),
            StoreSettings {
                username: Some("svc".into()),
                password: Some("secret".into()),
                ..settings()
            },
        );

        conn.connect().await.unwrap();
        assert_eq!(store.last_auth_mode(), Some(AuthMode::Basic));
    }

    #[tokio::test]
    async fn test_subscribe_filters_prefix() {
        let store = MemoryStore::new();
        let conn = StoreConnection::new(Arc::new(store.clone()), settings());
        let recorder = Arc::new(Recorder::default());

        let handle = conn.subscribe("/A", recorder.clone()).await.unwrap();
        store.put("/A/x", "1");
        store.put("/B/y", "2");
        store.put("/A/z", "3");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*recorder.keys.lock().unwrap(), vec!["/A/x", "/A/z"]);

        assert!(handle.cancel());
        assert!(!handle.cancel());
    }

    #[tokio::test]
    async fn test_subscribe_refused_returns_none() {
        let store = MemoryStore::new();
        store.set_watch_refused(true);
        let conn = StoreConnection::new(Arc::new(store), settings());
        assert!(conn.subscribe("/A", Arc::new(Recorder::default())).await.is_none());
    }
}
