//! Shared application state.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use tempforms_common::Clock;
use tempforms_core::{FormService, ResponseAccessGuard, ResponseService, SecretHasher};
use tempforms_db::LifecycleStore;
use tempforms_queue::ReclamationScheduler;

use crate::rate_limit::ApiRateLimiter;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub form_service: FormService,
    pub response_service: ResponseService,
    pub store: Arc<dyn LifecycleStore>,
    pub clock: Arc<dyn Clock>,
    /// Present when a reclamation sweep runs for this store.
    pub scheduler: Option<ReclamationScheduler>,
    pub rate_limiter: ApiRateLimiter,
    pub rate_limit_enabled: bool,
    /// Read client addresses from forwarding headers.
    pub trust_proxy_headers: bool,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services around one store, clock and hasher.
    #[must_use]
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn SecretHasher>,
    ) -> Self {
        Self {
            form_service: FormService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&hasher),
            ),
            response_service: ResponseService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                ResponseAccessGuard::new(hasher),
            ),
            store,
            clock,
            scheduler: None,
            rate_limiter: ApiRateLimiter::new(),
            rate_limit_enabled: true,
            trust_proxy_headers: false,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: ReclamationScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub const fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_trusted_proxy(mut self, trusted: bool) -> Self {
        self.trust_proxy_headers = trusted;
        self
    }
}
