//! Subscription ownership and restart logic.
//!
//! # Responsibilities
//! - Open the prefix watch once the initial load has succeeded
//! - Keep at most one live subscription
//! - Replace a silent subscription with a fresh one on a fresh connection
//! - Tear everything down on `stop()`, waiting for the liveness task to exit

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::LoadReport;
use crate::config::WatchSettings;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::store::{CancelHandle, StoreConnection};
use crate::supervisor::liveness::LivenessMonitor;
use crate::supervisor::router::EventRouter;
use crate::supervisor::state::{LivenessClock, StateCell, SupervisorState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// `start()` requires a successful initial load.
    #[error("initial load did not succeed ({loaded}/{expected} keys)")]
    LoadNotSucceeded { loaded: usize, expected: usize },

    #[error("supervisor already started (state: {0})")]
    AlreadyStarted(SupervisorState),
}

/// Result of a successful `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Subscription open, liveness task scheduled.
    Watching,
    /// No subscription could be opened; serving the loaded snapshot until a restart succeeds.
    Degraded,
    /// Local mode: nothing to watch.
    Local,
}

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// Last event is recent enough.
    Fresh,
    Restarted,
    RestartFailed,
    /// Nothing is supervised (stopped or local mode).
    Idle,
}

/// State shared between the supervisor and its liveness task.
pub(crate) struct Shared {
    connection: Arc<StoreConnection>,
    router: Arc<EventRouter>,
    prefix: String,
    settings: WatchSettings,
    clock: Arc<LivenessClock>,
    state: StateCell,
    subscription: Mutex<Option<CancelHandle>>,
}

impl Shared {
    fn subscription(&self) -> MutexGuard<'_, Option<CancelHandle>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the watch and install its handle. Returns whether it opened.
    async fn open(&self) -> bool {
        match self.connection.subscribe(&self.prefix, self.router.clone()).await {
            Some(handle) => {
                if let Some(old) = self.subscription().replace(handle) {
                    old.cancel();
                }
                self.clock.touch();
                self.state.set(SupervisorState::Watching);
                true
            }
            None => {
                self.state.set(SupervisorState::Stale);
                false
            }
        }
    }

    pub(crate) async fn check_liveness(&self) -> LivenessOutcome {
        let state = self.state.get();
        if matches!(state, SupervisorState::Stopped | SupervisorState::Local) {
            return LivenessOutcome::Idle;
        }

        let elapsed = self.clock.elapsed();
        if state == SupervisorState::Watching && elapsed <= self.settings.stale_after() {
            tracing::debug!(elapsed_secs = elapsed.as_secs(), "Store watcher alive");
            return LivenessOutcome::Fresh;
        }

        self.state.set(SupervisorState::Stale);
        tracing::warn!(
            elapsed_secs = elapsed.as_secs(),
            threshold_secs = self.settings.stale_after_secs,
            prefix = %self.prefix,
            "Store watcher stale, restarting"
        );
        self.restart().await
    }

    async fn restart(&self) -> LivenessOutcome {
        self.state.set(SupervisorState::Restarting);

        let old = self.subscription().take();
        if let Some(old) = old {
            old.cancel();
        }
        self.connection.invalidate();

        if self.open().await {
            metrics::record_watch_restart(true);
            tracing::info!(prefix = %self.prefix, "Store watcher restarted");
            LivenessOutcome::Restarted
        } else {
            metrics::record_watch_restart(false);
            tracing::error!(prefix = %self.prefix, "Store watcher restart failed, retrying on next check");
            LivenessOutcome::RestartFailed
        }
    }
}

/// Owns the prefix subscription and its liveness task.
pub struct SubscriptionSupervisor {
    shared: Arc<Shared>,
    local: bool,
    liveness: Mutex<Option<(Arc<Shutdown>, JoinHandle<()>)>>,
}

impl SubscriptionSupervisor {
    pub fn new(
        connection: Arc<StoreConnection>,
        router: Arc<EventRouter>,
        prefix: impl Into<String>,
        settings: WatchSettings,
        clock: Arc<LivenessClock>,
    ) -> Self {
        let local = connection.settings().use_local_config;
        Self {
            shared: Arc::new(Shared {
                connection,
                router,
                prefix: prefix.into(),
                settings,
                clock,
                state: StateCell::default(),
                subscription: Mutex::new(None),
            }),
            local,
            liveness: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state.get()
    }

    pub fn clock(&self) -> &LivenessClock {
        &self.shared.clock
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    /// Whether a subscription handle is currently held.
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription().is_some()
    }

    fn liveness_slot(&self) -> MutexGuard<'_, Option<(Arc<Shutdown>, JoinHandle<()>)>> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the subscription and schedule the liveness task.
    ///
    /// A subscription that cannot be opened is a degraded start, not an error.
    pub async fn start(&self, report: &LoadReport) -> Result<StartOutcome, SupervisorError> {
        if !report.success {
            return Err(SupervisorError::LoadNotSucceeded {
                loaded: report.loaded,
                expected: report.expected,
            });
        }
        let state = self.state();
        if state != SupervisorState::Stopped {
            return Err(SupervisorError::AlreadyStarted(state));
        }

        if self.local {
            self.shared.state.set(SupervisorState::Local);
            tracing::info!("Local configuration mode, store watcher not started");
            return Ok(StartOutcome::Local);
        }

        self.shared.state.set(SupervisorState::Starting);
        let outcome = if self.shared.open().await {
            tracing::info!(prefix = %self.shared.prefix, "Store watcher started");
            StartOutcome::Watching
        } else {
            tracing::warn!(
                prefix = %self.shared.prefix,
                "Store watcher unavailable, serving loaded configuration without live updates"
            );
            StartOutcome::Degraded
        };

        let shutdown = Arc::new(Shutdown::new());
        let monitor = LivenessMonitor::new(self.shared.clone(), self.shared.settings.check_interval());
        let handle = tokio::spawn(monitor.run(shutdown.subscribe()));
        *self.liveness_slot() = Some((shutdown, handle));

        Ok(outcome)
    }

    /// Run one liveness check now, outside the periodic schedule.
    pub async fn check_liveness(&self) -> LivenessOutcome {
        self.shared.check_liveness().await
    }

    /// Stop the liveness task (awaiting its exit), then cancel the subscription.
    ///
    /// Idempotent; safe without a prior `start()`.
    pub async fn stop(&self) {
        let task = self.liveness_slot().take();
        if let Some((shutdown, handle)) = task {
            shutdown.trigger();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Liveness task ended abnormally");
            }
        }

        let subscription = self.shared.subscription().take();
        if let Some(subscription) = subscription {
            subscription.cancel();
            tracing::info!(prefix = %self.shared.prefix, "Store watcher stopped");
        }
        self.shared.state.set(SupervisorState::Stopped);
    }
}

impl Drop for SubscriptionSupervisor {
    fn drop(&mut self) {
        let task = self.liveness.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((shutdown, handle)) = task {
            shutdown.trigger();
            handle.abort();
        }
        if let Some(subscription) = self.shared.subscription().take() {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ConfigCache, LoadSource};
    use crate::config::StoreSettings;
    use crate::schema::{KeyMapping, Schema};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn report(success: bool) -> LoadReport {
        LoadReport {
            source: LoadSource::Store,
            expected: 1,
            loaded: usize::from(success),
            missing: Vec::new(),
            rejected: Vec::new(),
            success,
        }
    }

    fn supervisor(store: &MemoryStore, local: bool) -> SubscriptionSupervisor {
        let settings = StoreSettings {
            endpoint: Some("http://127.0.0.1:2379".into()),
            use_local_config: local,
            ..StoreSettings::default()
        };
        let connection = Arc::new(StoreConnection::new(Arc::new(store.clone()), settings));
        let mapping = KeyMapping::builder("/A").key("Name", "name").build().unwrap();
        let clock = Arc::new(LivenessClock::new());
        let (tx, _) = broadcast::channel(8);
        let router = Arc::new(EventRouter::new(
            Schema::passthrough(mapping),
            connection.clone(),
            Arc::new(ConfigCache::new()),
            clock.clone(),
            tx,
        ));
        // periodic checks stay out of the way; these tests drive checks by hand
        let settings = WatchSettings {
            check_interval_secs: 3600,
            ..WatchSettings::default()
        };
        SubscriptionSupervisor::new(connection, router, "/A", settings, clock)
    }

    #[tokio::test]
    async fn test_start_requires_successful_load() {
        let store = MemoryStore::new();
        let sup = supervisor(&store, false);
        let err = sup.start(&report(false)).await.unwrap_err();
        assert_eq!(err, SupervisorError::LoadNotSucceeded { loaded: 0, expected: 1 });
        assert_eq!(store.watch_count(), 0);
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = MemoryStore::new();
        let sup = supervisor(&store, false);

        assert_eq!(sup.start(&report(true)).await.unwrap(), StartOutcome::Watching);
        assert_eq!(sup.state(), SupervisorState::Watching);
        assert!(sup.is_subscribed());
        assert!(matches!(
            sup.start(&report(true)).await,
            Err(SupervisorError::AlreadyStarted(SupervisorState::Watching))
        ));

        sup.stop().await;
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert!(!sup.is_subscribed());
        sup.stop().await;
        assert_eq!(store.watch_count(), 1);
    }

    #[tokio::test]
    async fn test_local_mode_opens_nothing() {
        let store = MemoryStore::new();
        let sup = supervisor(&store, true);
        assert_eq!(sup.start(&report(true)).await.unwrap(), StartOutcome::Local);
        assert_eq!(sup.state(), SupervisorState::Local);
        assert_eq!(sup.check_liveness().await, LivenessOutcome::Idle);
        assert_eq!(store.connect_count(), 0);
        sup.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let sup = supervisor(&MemoryStore::new(), false);
        sup.stop().await;
        sup.stop().await;
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_check_restarts_on_fresh_connection() {
        let store = MemoryStore::new();
        let sup = supervisor(&store, false);
        sup.start(&report(true)).await.unwrap();
        assert_eq!(sup.check_liveness().await, LivenessOutcome::Fresh);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(sup.check_liveness().await, LivenessOutcome::Restarted);
        assert_eq!(store.watch_count(), 2);
        assert_eq!(store.connect_count(), 2);
        assert_eq!(sup.clock().elapsed(), Duration::ZERO);
        assert_eq!(sup.check_liveness().await, LivenessOutcome::Fresh);

        sup.stop().await;
    }
}
