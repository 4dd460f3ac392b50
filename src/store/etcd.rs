//! etcd v3 store adapter.
//!
//! # Responsibilities
//! - Open an `etcd-client` connection with optional TLS CA bundle and user auth
//! - Point reads through the KV API
//! - Prefix watch through a single `watch` call with an explicit range end
//!
//! # Design Decisions
//! - Only token auth exists in etcd v3; `AuthMode::Basic` reports `Unsupported`
//!   so the connection layer moves on to its next fallback
//! - Expired tokens are recognised from the server message

use std::sync::Arc;

use async_trait::async_trait;
use etcd_client::{Certificate, Client, TlsOptions, WatchOptions};
use futures_util::stream;

use crate::store::{AuthMode, ConnectOptions, KvClient, KvStore, StoreError, WatchStream};

/// Factory for etcd clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtcdStore;

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("invalid auth token") || lowered.contains("unauthenticated") {
            StoreError::AuthExpired(message)
        } else if lowered.contains("authentication failed") || lowered.contains("invalid username") {
            StoreError::AuthFailed(message)
        } else if matches!(err, etcd_client::Error::TransportError(_)) {
            StoreError::Unavailable(message)
        } else {
            StoreError::Rpc(message)
        }
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn KvClient>, StoreError> {
        let mut connect = etcd_client::ConnectOptions::new()
            .with_connect_timeout(options.connect_timeout)
            .with_timeout(options.connect_timeout);

        if options.endpoint.is_tls() {
            let mut tls = TlsOptions::new().domain_name(options.endpoint.host.clone());
            if let Some(path) = &options.ca_cert_path {
                let pem = tokio::fs::read(path)
                    .await
                    .map_err(|e| StoreError::Tls(format!("reading {}: {}", path.display(), e)))?;
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            connect = connect.with_tls(tls);
        }

        match &options.auth {
            Some((credentials, AuthMode::Token)) => {
                connect = connect.with_user(credentials.username.clone(), credentials.password.clone());
            }
            Some((_, AuthMode::Basic)) => {
                return Err(StoreError::Unsupported("etcd v3 offers token auth only".into()));
            }
            None => {}
        }

        let client = Client::connect([options.endpoint.url()], Some(connect))
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::AuthExpired(msg) if options.auth.is_some() => StoreError::AuthFailed(msg),
                other => other,
            })?;
        Ok(Arc::new(EtcdClient { client }))
    }
}

struct EtcdClient {
    client: Client,
}

#[async_trait]
impl KvClient for EtcdClient {
    async fn version(&self) -> Result<String, StoreError> {
        let mut client = self.client.clone();
        let status = client.status().await?;
        Ok(status.version().to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await?;
        match response.kvs().first() {
            Some(kv) => Ok(Some(kv.value_str()?.to_string())),
            None => Ok(None),
        }
    }

    async fn watch(&self, key: &str, range_end: &[u8]) -> Result<WatchStream, StoreError> {
        let mut client = self.client.clone();
        let options = WatchOptions::new()
            .with_range(range_end.to_vec())
            .with_progress_notify()
            .with_prev_key();
        let (watcher, watch_stream) = client.watch(key, Some(options)).await?;

        // The watcher is kept in the stream state; dropping it cancels the watch.
        let events = stream::unfold((watcher, watch_stream), |(watcher, mut watch_stream)| async move {
            match watch_stream.message().await {
                Ok(Some(response)) => {
                    let keys = response
                        .events()
                        .iter()
                        .filter_map(|event| event.kv())
                        .filter_map(|kv| kv.key_str().ok())
                        .map(str::to_string)
                        .collect();
                    Some((Ok(keys), (watcher, watch_stream)))
                }
                Ok(None) => None,
                Err(e) => Some((Err(StoreError::from(e)), (watcher, watch_stream))),
            }
        });
        Ok(Box::pin(events))
    }
}
