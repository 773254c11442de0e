//! Repository traits
//!
//! Define async repository interfaces for database operations. Every
//! mutation that the engine needs to be atomic is expressed as a single
//! repository call, so each implementation can make it atomic in its own way.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::*;

/// Plan repository trait
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Find a plan by ID, active or retired
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRow>>;

    /// List active plans ordered by sort order ascending
    async fn list_active(&self) -> DbResult<Vec<PlanRow>>;

    /// Create a new plan
    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRow>;

    /// Set the active flag; fails with `NotFound` for an unknown plan
    async fn set_active(&self, id: Uuid, active: bool) -> DbResult<()>;
}

/// Create plan input
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    pub card_monthly_product_id: Option<String>,
    pub card_yearly_product_id: Option<String>,
    pub apple_monthly_product_id: Option<String>,
    pub apple_yearly_product_id: Option<String>,
    pub google_monthly_product_id: Option<String>,
    pub google_yearly_product_id: Option<String>,
    pub max_analyses_per_month: Option<i32>,
    pub max_storage_gb: Option<i32>,
    pub chat_enabled: bool,
    pub priority_support: bool,
    pub sort_order: i32,
}

/// Subscription listing filter
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    pub status: Option<String>,
    pub platform: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self {
            status: None,
            platform: None,
            page: 1,
            limit: 20,
        }
    }
}

impl SubscriptionFilter {
    pub(crate) fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Subscription repository trait
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Find a subscription by ID
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>>;

    /// Find a subscription by the platform's own identifier
    async fn find_by_platform_id(
        &self,
        platform: &str,
        platform_subscription_id: &str,
    ) -> DbResult<Option<SubscriptionRow>>;

    /// List a user's subscriptions newest first, with the unpaginated total
    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &SubscriptionFilter,
    ) -> DbResult<(Vec<SubscriptionRow>, i64)>;

    /// Latest-created ACTIVE/TRIALING subscription whose period extends past `now`
    /// and whose scheduled cancellation (if any) has not come due
    async fn find_entitled_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SubscriptionRow>>;

    /// Non-terminal subscriptions with `cancel_at <= now`, ordered by
    /// `(cancel_at, id)` and starting strictly after the `after` cursor
    async fn list_cancellation_due(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u32,
    ) -> DbResult<Vec<SubscriptionRow>>;

    /// Insert a new subscription; `Conflict` if the platform id is already tracked
    async fn create(&self, row: SubscriptionRow) -> DbResult<SubscriptionRow>;

    /// Replace the stored row if its version still equals `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`. Returns `false` when
    /// another writer got there first.
    async fn compare_and_swap(&self, row: &SubscriptionRow, expected_version: i64)
        -> DbResult<bool>;
}

/// Create payment input
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub platform: String,
    pub platform_payment_id: String,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Payment repository trait
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Append a payment unless one with the same platform payment id exists.
    ///
    /// Returns `true` when a row was inserted.
    async fn insert_if_absent(&self, payment: CreatePayment) -> DbResult<bool>;

    /// List payments recorded against a subscription, oldest first
    async fn list_by_subscription(&self, subscription_id: Uuid) -> DbResult<Vec<PaymentRow>>;
}

/// Usage increments for one period row
#[derive(Debug, Clone, Default)]
pub struct UsageIncrement {
    pub analyses: i64,
    pub storage_gb: Decimal,
    pub chat_messages: i64,
}

/// Usage repository trait
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Get the period row, creating a zeroed one if absent
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> DbResult<UsageRow>;

    /// Atomically add the increments to the period row (upsert) and return it
    async fn increment(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
        delta: &UsageIncrement,
    ) -> DbResult<UsageRow>;
}

/// Webhook idempotency repository trait
///
/// An event is first *claimed*, then either *completed* or *released*. A
/// claim left unfinished past `stale_before` may be taken over, so a worker
/// that died mid-event does not block redelivery forever.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Claim exclusive processing of an event. Returns `false` if the event was
    /// already processed or is being processed by a live claim.
    async fn claim(
        &self,
        platform: &str,
        platform_event_id: &str,
        event_type: &str,
        stale_before: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Mark a claimed event as processed with its outcome
    async fn complete(&self, platform: &str, platform_event_id: &str, outcome: &str)
        -> DbResult<()>;

    /// Drop a claim so a redelivery can process the event again
    async fn release(&self, platform: &str, platform_event_id: &str) -> DbResult<()>;

    /// Look up an event record
    async fn find(
        &self,
        platform: &str,
        platform_event_id: &str,
    ) -> DbResult<Option<WebhookEventRow>>;
}
