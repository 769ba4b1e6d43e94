//! Periodic reclamation of expired forms and responses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempforms_common::config::LifecycleConfig;
use tempforms_common::{AppResult, Clock};
use tempforms_db::LifecycleStore;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay before the first sweep after startup (default: 5 seconds).
    pub initial_delay: Duration,
    /// Interval between sweeps (default: 1 hour).
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl From<&LifecycleConfig> for SchedulerConfig {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_sweep_delay_secs),
            // A zero period would panic inside `interval`.
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }
}

/// Scheduler state for tracking sweeps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub last_run: Option<DateTime<Utc>>,
    pub last_reclaimed: Option<u64>,
    pub total_reclaimed: u64,
    pub consecutive_failures: u32,
}

/// Drives `reclaim_expired` on a fixed timer for stores without native expiry.
#[derive(Clone)]
pub struct ReclamationScheduler {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    state: Arc<RwLock<SchedulerState>>,
}

impl ReclamationScheduler {
    /// Create a scheduler. Nothing runs until [`Self::spawn`] or [`Self::run_once`].
    #[must_use]
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            state: Arc::new(RwLock::new(SchedulerState::default())),
        }
    }

    /// Snapshot of the sweep bookkeeping.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }

    /// Run a single sweep now.
    ///
    /// Safe to call while a timed sweep is in flight; reclaiming an already
    /// reclaimed record is not an error.
    pub async fn run_once(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let result = self.store.reclaim_expired(now).await;

        let mut state = self.state.write().await;
        state.last_run = Some(now);
        match &result {
            Ok(count) => {
                state.last_reclaimed = Some(*count);
                state.total_reclaimed += count;
                state.consecutive_failures = 0;
                if *count > 0 {
                    tracing::info!(
                        count,
                        backend = self.store.backend_name(),
                        "Reclaimed expired records"
                    );
                } else {
                    tracing::debug!("Reclamation sweep found nothing to remove");
                }
            }
            Err(e) => {
                state.consecutive_failures += 1;
                tracing::error!(
                    error = %e,
                    failures = state.consecutive_failures,
                    "Reclamation sweep failed, retrying next interval"
                );
            }
        }

        result
    }

    /// Start the periodic sweep on the runtime.
    ///
    /// Returns `None` when the store expires records on its own.
    #[must_use]
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if self.store.has_native_expiry() {
            tracing::info!(
                backend = self.store.backend_name(),
                "Store has native expiry, reclamation sweep not scheduled"
            );
            return None;
        }

        tracing::info!(
            initial_delay_secs = self.config.initial_delay.as_secs(),
            interval_secs = self.config.sweep_interval.as_secs(),
            "Reclamation sweep scheduled"
        );

        Some(tokio::spawn(async move {
            sleep(self.config.initial_delay).await;

            let mut ticker = interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Errors are logged and counted inside.
                let _ = self.run_once().await;
            }
        }))
    }
}
