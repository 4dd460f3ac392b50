//! Subscription supervision subsystem.
//!
//! # Data Flow
//! ```text
//! start(load report)
//!     → subscription.rs (StoreConnection::subscribe on the mapping prefix)
//!     → router.rs (event → re-read key → coerce → ConfigCache::update)
//!     → state.rs LivenessClock touched per event
//!
//! every check interval:
//!     liveness.rs → elapsed > threshold?
//!     → cancel subscription → drop client handle → subscribe again
//! ```

mod liveness;
pub mod router;
pub mod state;
pub mod subscription;

pub use router::{ConfigChange, EventRouter, RouteOutcome};
pub use state::{LivenessClock, SupervisorState};
pub use subscription::{LivenessOutcome, StartOutcome, SubscriptionSupervisor, SupervisorError};
