//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use cadence_billing_core::BillingService;
use cadence_db::DbPool;

use crate::config::Config;

/// State cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Absent when running on the in-memory store
    pub pool: Option<DbPool>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(billing: BillingService, pool: Option<DbPool>, config: Config) -> Self {
        Self {
            billing: Arc::new(billing),
            pool,
            config: Arc::new(config),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }
}

// Config carries platform credentials; keep them out of debug output
impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("http_port", &self.config.http_port)
            .field("persistent", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}
