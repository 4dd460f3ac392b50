//! Key-value store access.
//!
//! # Data Flow
//! ```text
//! KvStore::connect (endpoint, credentials, TLS)
//!     → KvClient (point reads, prefix watch)
//!     → connection.rs (lazy handle, reconnect on expiry, prefix filtering)
//!     → loader / event router
//!
//! Implementations:
//!     memory.rs (in-process, fault injection)
//!     etcd.rs   (etcd v3, feature "etcd")
//! ```
//!
//! # Design Decisions
//! - The store is an opaque service behind two small traits
//! - One canonical streaming watch per client; no probing for alternate APIs
//! - Failures are values (`StoreError`), never panics

pub mod connection;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use url::Url;

pub use connection::{CancelHandle, StoreConnection, WatchHandler};
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Host used when the endpoint does not name one.
pub const DEFAULT_HOST: &str = "etcd-client";
/// Client port used when the endpoint does not name one.
pub const DEFAULT_PORT: u16 = 2379;

/// Errors surfaced by store clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No endpoint configured.
    #[error("store endpoint not configured")]
    NotConfigured,

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Unreachable, DNS failure, refused connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Credentials rejected while opening a session.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A previously valid session token is no longer accepted.
    #[error("auth token expired: {0}")]
    AuthExpired(String),

    /// The client does not offer the requested mode.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl StoreError {
    /// Whether this failure means the session token must be renewed.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            StoreError::AuthExpired(_) => true,
            other => other.to_string().to_lowercase().contains("invalid auth token"),
        }
    }
}

/// Parsed store endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `scheme://host:port`, defaulting scheme, host, and port.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StoreError::NotConfigured);
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        let url = Url::parse(&with_scheme).map_err(|e| StoreError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(StoreError::InvalidEndpoint {
                endpoint: raw.to_string(),
                reason: format!("unsupported scheme '{}'", scheme),
            });
        }

        Ok(Self {
            scheme,
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Username/password pair. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authentication modes, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Session token obtained once and attached to every call and the watch stream.
    Token,
    /// Credentials presented per request.
    Basic,
}

/// Everything a [`KvStore`] needs to open a client.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub endpoint: Endpoint,
    /// CA bundle for `https` endpoints.
    pub ca_cert_path: Option<PathBuf>,
    pub auth: Option<(Credentials, AuthMode)>,
    pub connect_timeout: Duration,
}

/// Batches of changed keys, one item per store notification.
pub type WatchStream = BoxStream<'static, Result<Vec<String>, StoreError>>;

/// Factory for store clients.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn KvClient>, StoreError>;
}

/// A connected store client.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Server version, used to verify the connection.
    async fn version(&self) -> Result<String, StoreError>;

    /// Point read of one key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Watch every key in `[key, range_end)`.
    async fn watch(&self, key: &str, range_end: &[u8]) -> Result<WatchStream, StoreError>;
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Increments the last byte that is not `0xff` and truncates after it.
/// An empty or all-`0xff` prefix yields `[0]`, the store's "no upper bound" marker.
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    match prefix.iter().rposition(|&b| b < 0xff) {
        Some(i) => {
            let mut end = prefix[..=i].to_vec();
            end[i] += 1;
            end
        }
        None => vec![0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        let ep = Endpoint::parse("https://etcd.example.com:2379").unwrap();
        assert_eq!(ep.scheme, "https");
        assert_eq!(ep.host, "etcd.example.com");
        assert_eq!(ep.port, 2379);
        assert!(ep.is_tls());

        let ep = Endpoint::parse("etcd.local").unwrap();
        assert_eq!(ep.url(), "http://etcd.local:2379");
        assert!(!ep.is_tls());

        let ep = Endpoint::parse("http://10.0.0.5:12379").unwrap();
        assert_eq!(ep.port, 12379);
    }

    #[test]
    fn test_endpoint_errors() {
        assert_eq!(Endpoint::parse("  "), Err(StoreError::NotConfigured));
        assert!(matches!(
            Endpoint::parse("ftp://etcd:2379"),
            Err(StoreError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"/APPS/Svc"), b"/APPS/Svd".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
        assert_eq!(prefix_range_end(b""), vec![0]);
    }

    #[test]
    fn test_auth_expiry_detection() {
        assert!(StoreError::AuthExpired("x".into()).is_auth_expired());
        assert!(StoreError::Rpc("etcdserver: invalid auth token".into()).is_auth_expired());
        assert!(!StoreError::Unavailable("refused".into()).is_auth_expired());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("svc"));
        assert!(!shown.contains("hunter2"));
    }
}
