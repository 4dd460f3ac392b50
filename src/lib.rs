//! Live configuration cache backed by etcd.
//!
//! Loads a set of named configuration values from a key-value store (or from
//! environment variables in local mode), keeps them in memory, and applies
//! store changes as they are watched.

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod live;
pub mod observability;
pub mod schema;
pub mod store;
pub mod supervisor;

pub use cache::{ConfigSnapshot, LoadReport};
pub use config::Settings;
pub use live::{LiveConfig, LiveConfigBuilder, LiveConfigError};
pub use schema::{KeyMapping, Schema, Value};
pub use supervisor::{ConfigChange, SupervisorState};
