//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, runtime level changes)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout via tracing-subscriber fmt layer
//!     → Metrics endpoint (Prometheus scrape, binary only)
//! ```
//!
//! # Design Decisions
//! - Log levels can be driven by configuration keys in the store itself
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
