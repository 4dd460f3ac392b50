//! In-process key-value store.
//!
//! # Responsibilities
//! - Implement the store client contract without a server
//! - Push change events to watchers over a broadcast channel
//! - Inject faults: refused connections, refused watches, failing keys,
//!   expired sessions, rejected token auth
//!
//! # Design Decisions
//! - Cloning a `MemoryStore` shares the same data (Arc inside)
//! - Watch ranges follow the same `[key, range_end)` convention as etcd

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream;
use tokio::sync::broadcast;

use crate::store::{AuthMode, ConnectOptions, KvClient, KvStore, StoreError, WatchStream};

const EVENT_CAPACITY: usize = 1024;

struct Inner {
    data: DashMap<String, String>,
    events: broadcast::Sender<String>,
    session: AtomicU64,
    connect_refused: AtomicBool,
    watch_refused: AtomicBool,
    token_auth_rejected: AtomicBool,
    failing_keys: Mutex<HashSet<String>>,
    last_auth_mode: Mutex<Option<AuthMode>>,
    connects: AtomicUsize,
    watches: AtomicUsize,
    reads: AtomicUsize,
}

/// Shared in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                data: DashMap::new(),
                events,
                session: AtomicU64::new(0),
                connect_refused: AtomicBool::new(false),
                watch_refused: AtomicBool::new(false),
                token_auth_rejected: AtomicBool::new(false),
                failing_keys: Mutex::new(HashSet::new()),
                last_auth_mode: Mutex::new(None),
                connects: AtomicUsize::new(0),
                watches: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Store pre-populated with `entries`, without emitting events.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.inner.data.insert(key.into(), value.into());
        }
        store
    }

    /// Set a key and notify watchers.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.inner.data.insert(key.clone(), value.into());
        let _ = self.inner.events.send(key);
    }

    /// Remove a key and notify watchers.
    pub fn delete(&self, key: &str) {
        self.inner.data.remove(key);
        let _ = self.inner.events.send(key.to_string());
    }

    /// Notify watchers about `key` without changing it.
    pub fn touch(&self, key: &str) {
        let _ = self.inner.events.send(key.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.data.get(key).map(|v| v.value().clone())
    }

    /// Make every read of `key` fail until [`heal_key`](Self::heal_key).
    pub fn fail_key(&self, key: &str) {
        self.failing_keys().insert(key.to_string());
    }

    pub fn heal_key(&self, key: &str) {
        self.failing_keys().remove(key);
    }

    /// Invalidate all sessions opened so far; their reads report an expired token.
    pub fn expire_sessions(&self) {
        self.inner.session.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_connect_refused(&self, refused: bool) {
        self.inner.connect_refused.store(refused, Ordering::SeqCst);
    }

    pub fn set_watch_refused(&self, refused: bool) {
        self.inner.watch_refused.store(refused, Ordering::SeqCst);
    }

    pub fn set_token_auth_rejected(&self, rejected: bool) {
        self.inner.token_auth_rejected.store(rejected, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.inner.watches.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of watch streams currently alive.
    pub fn active_watchers(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Auth mode of the most recent successful connection, if any.
    pub fn last_auth_mode(&self) -> Option<AuthMode> {
        *self
            .inner
            .last_auth_mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn failing_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner
            .failing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn KvClient>, StoreError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        if self.inner.connect_refused.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "connection refused by {}",
                options.endpoint
            )));
        }
        if options.endpoint.is_tls() {
            if let Some(path) = &options.ca_cert_path {
                if !path.exists() {
                    return Err(StoreError::Tls(format!(
                        "CA bundle {} not found",
                        path.display()
                    )));
                }
            }
        }

        let mode = options.auth.as_ref().map(|(_, mode)| *mode);
        if mode == Some(AuthMode::Token) && self.inner.token_auth_rejected.load(Ordering::SeqCst) {
            return Err(StoreError::AuthFailed("token authentication rejected".into()));
        }
        *self
            .inner
            .last_auth_mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = mode;

        Ok(Arc::new(MemoryClient {
            store: self.clone(),
            session: self.inner.session.load(Ordering::SeqCst),
        }))
    }
}

struct MemoryClient {
    store: MemoryStore,
    session: u64,
}

impl MemoryClient {
    fn inner(&self) -> &Inner {
        &self.store.inner
    }
}

#[async_trait]
impl KvClient for MemoryClient {
    async fn version(&self) -> Result<String, StoreError> {
        Ok(concat!("memory-", env!("CARGO_PKG_VERSION")).to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner().reads.fetch_add(1, Ordering::SeqCst);

        if self.inner().session.load(Ordering::SeqCst) != self.session {
            return Err(StoreError::AuthExpired("etcdserver: invalid auth token".into()));
        }
        let failing = self.store.failing_keys().contains(key);
        if failing {
            return Err(StoreError::Rpc(format!("injected read failure for {}", key)));
        }
        Ok(self.store.value(key))
    }

    async fn watch(&self, key: &str, range_end: &[u8]) -> Result<WatchStream, StoreError> {
        if self.inner().watch_refused.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("watch refused".into()));
        }
        self.inner().watches.fetch_add(1, Ordering::SeqCst);

        let start = key.as_bytes().to_vec();
        let end = range_end.to_vec();
        let rx = self.inner().events.subscribe();

        let events = stream::unfold(rx, move |mut rx| {
            let start = start.clone();
            let end = end.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(changed) => {
                            if in_range(changed.as_bytes(), &start, &end) {
                                return Some((Ok(vec![changed]), rx));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            return Some((
                                Err(StoreError::Rpc(format!("watch lagged by {} events", skipped))),
                                rx,
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(events))
    }
}

fn in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    key >= start && (end == [0] || key < end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Endpoint;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn options() -> ConnectOptions {
        ConnectOptions {
            endpoint: Endpoint::parse("http://memory:2379").unwrap(),
            ca_cert_path: None,
            auth: None,
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_get_and_session_expiry() {
        let store = MemoryStore::with_entries([("/A/x", "1")]);
        let client = store.connect(&options()).await.unwrap();
        assert_eq!(client.get("/A/x").await.unwrap(), Some("1".into()));
        assert_eq!(client.get("/A/y").await.unwrap(), None);

        store.expire_sessions();
        let err = client.get("/A/x").await.unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_watch_respects_range() {
        let store = MemoryStore::new();
        let client = store.connect(&options()).await.unwrap();
        let mut events = client.watch("/A/", b"/A0").await.unwrap();
        assert_eq!(store.active_watchers(), 1);

        store.put("/B/x", "ignored");
        store.put("/A/x", "1");
        let batch = events.next().await.unwrap().unwrap();
        assert_eq!(batch, vec!["/A/x".to_string()]);

        drop(events);
        assert_eq!(store.active_watchers(), 0);
    }

    #[tokio::test]
    async fn test_tls_requires_existing_bundle() {
        let store = MemoryStore::new();
        let mut opts = options();
        opts.endpoint = Endpoint::parse("https://memory:2379").unwrap();
        opts.ca_cert_path = Some("/nonexistent/ca.pem".into());
        assert!(matches!(store.connect(&opts).await, Err(StoreError::Tls(_))));
    }
}
