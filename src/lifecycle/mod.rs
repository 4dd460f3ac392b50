//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop() → trigger → background tasks leave their loops → stop() awaits them
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → CLI stops the live cache and exits
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
