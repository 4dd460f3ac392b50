//! Configuration cache subsystem.
//!
//! # Data Flow
//! ```text
//! loader.rs (bulk load: store or environment → coerce)
//!     → ConfigCache::replace (whole snapshot, first write)
//!     → supervisor event router → ConfigCache::update (one entry per event)
//!     → readers get copies via ConfigCache::snapshot
//! ```

pub mod loader;
pub mod snapshot;

pub use loader::{BulkLoader, LoadError, LoadReport, LoadSource};
pub use snapshot::{ConfigCache, ConfigSnapshot};
