//! Usage ledger
//!
//! Per-user consumption counters for the calendar month containing "today"
//! in the ledger's clock. Rows are created lazily and only ever incremented.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use cadence_db::{UsageIncrement, UsageRepository};
use cadence_types::{month_bounds, UsageDelta, UsagePeriod, UserId};

use crate::clock::Clock;
use crate::error::BillingError;

/// Calendar-month usage counters
#[derive(Clone)]
pub struct UsageLedger {
    usage: Arc<dyn UsageRepository>,
    clock: Arc<dyn Clock>,
}

impl UsageLedger {
    pub fn new(usage: Arc<dyn UsageRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { usage, clock }
    }

    /// Usage for the current month, created zeroed on first access
    pub async fn get_usage(&self, user_id: UserId) -> Result<UsagePeriod, BillingError> {
        let (start, end) = month_bounds(self.clock.today());
        let row = self.usage.get_or_create(user_id.0, start, end).await?;
        Ok(row.into())
    }

    /// Add non-negative increments to the current month atomically
    #[instrument(skip(self))]
    pub async fn increment_usage(
        &self,
        user_id: UserId,
        delta: &UsageDelta,
    ) -> Result<UsagePeriod, BillingError> {
        if let Some(field) = delta.negative_field() {
            return Err(BillingError::Validation(format!(
                "{field} must not be negative"
            )));
        }
        if delta.is_empty() {
            return self.get_usage(user_id).await;
        }

        let increment = UsageIncrement {
            analyses: delta.analyses_used.unwrap_or_default(),
            storage_gb: delta.storage_used_gb.unwrap_or(Decimal::ZERO),
            chat_messages: delta.chat_messages_used.unwrap_or_default(),
        };

        let (start, end) = month_bounds(self.clock.today());
        let row = self
            .usage
            .increment(user_id.0, start, end, &increment)
            .await?;

        record(delta);
        debug!(user_id = %user_id, analyses_used = row.analyses_used, "Recorded usage");
        Ok(row.into())
    }
}

fn record(delta: &UsageDelta) {
    if delta.analyses_used.is_some_and(|v| v > 0) {
        metrics::counter!("billing_usage_recorded_total", "field" => "analyses_used").increment(1);
    }
    if delta.storage_used_gb.is_some_and(|v| v > Decimal::ZERO) {
        metrics::counter!("billing_usage_recorded_total", "field" => "storage_used_gb")
            .increment(1);
    }
    if delta.chat_messages_used.is_some_and(|v| v > 0) {
        metrics::counter!("billing_usage_recorded_total", "field" => "chat_messages_used")
            .increment(1);
    }
}
