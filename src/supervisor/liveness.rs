//! Periodic liveness check of the store watcher.
//!
//! # Responsibilities
//! - Wake up on a fixed interval and compare the liveness clock to the threshold
//! - Restart the subscription when it has gone silent
//!
//! # Design Decisions
//! - The interval is the only backoff; a failed restart is retried on the next tick
//! - Shutdown interrupts both the sleep and an in-progress check

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::supervisor::subscription::{LivenessOutcome, Shared};

pub(crate) struct LivenessMonitor {
    shared: Arc<Shared>,
    interval: Duration,
}

impl LivenessMonitor {
    pub(crate) fn new(shared: Arc<Shared>, interval: Duration) -> Self {
        Self { shared, interval }
    }

    pub(crate) async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(interval_secs = self.interval.as_secs(), "Liveness monitor starting");

        // first check one full interval after start
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        outcome = self.shared.check_liveness() => {
                            if outcome == LivenessOutcome::Idle {
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!("Liveness monitor exiting");
    }
}
