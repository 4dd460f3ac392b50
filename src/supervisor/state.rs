//! Supervisor state machine and liveness clock.
//!
//! # States
//! - Stopped: no subscription, no liveness task
//! - Starting: `start()` in progress
//! - Watching: subscription open and delivering events
//! - Stale: no subscription (restart failed, or it never opened); the next tick retries
//! - Restarting: liveness task is replacing the subscription
//! - Local: environment-sourced configuration, nothing to watch
//!
//! # State Transitions
//! ```text
//! Stopped → Starting → Watching | Stale | Local
//! Watching → Stale → Restarting → Watching | Stale
//! any → Stopped
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SupervisorState {
    Stopped = 0,
    Starting = 1,
    Watching = 2,
    Stale = 3,
    Restarting = 4,
    Local = 5,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SupervisorState::Starting,
            2 => SupervisorState::Watching,
            3 => SupervisorState::Stale,
            4 => SupervisorState::Restarting,
            5 => SupervisorState::Local,
            _ => SupervisorState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Watching => "watching",
            SupervisorState::Stale => "stale",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Local => "local",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically readable [`SupervisorState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: SupervisorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SupervisorState {
        SupervisorState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Store `next`, returning the previous state.
    pub fn set(&self, next: SupervisorState) -> SupervisorState {
        let previous = SupervisorState::from_u8(self.0.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Supervisor state changed");
        }
        previous
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(SupervisorState::Stopped)
    }
}

/// Time of the last received watch event.
///
/// Stored as milliseconds since a fixed origin so it fits in one atomic word.
#[derive(Debug)]
pub struct LivenessClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl LivenessClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Mark "now" as the last event time.
    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::SeqCst);
    }

    /// Time since the last touch (or since creation).
    pub fn elapsed(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::SeqCst)))
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}
