//! Database row models
//!
//! These types map directly to database rows using SQLx's FromRow derive.
//! Enumerated columns are stored as their canonical upper-case strings and
//! parsed back when converting to `cadence-types` domain values.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use cadence_types::{
    EntitlementLimits, Payment, PaymentId, Plan, PlanId, PlatformProducts, Subscription,
    SubscriptionId, UsagePeriod, UserId,
};

use crate::error::DbError;

/// Subscription plan row
#[derive(Debug, Clone, FromRow)]
pub struct PlanRow {
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
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub billing_cycle: String,
    pub platform: String,
    pub platform_subscription_id: Option<String>,
    pub platform_customer_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub next_payment_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment audit row
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
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
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Usage period row
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub analyses_used: i64,
    pub storage_used_gb: Decimal,
    pub chat_messages_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Webhook idempotency record
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEventRow {
    pub platform: String,
    pub platform_event_id: String,
    pub event_type: String,
    pub outcome: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// Conversion implementations between row types and cadence-types domain types

fn parse_column<T>(column: &str, value: &str) -> Result<T, DbError>
where
    T: std::str::FromStr,
{
    value
        .parse()
        .map_err(|_| DbError::Corrupt(format!("{column} = {value:?}")))
}

fn cap_from_column(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: PlanId(row.id),
            name: row.name,
            description: row.description,
            features: row.features,
            monthly_price: row.monthly_price,
            yearly_price: row.yearly_price,
            products: PlatformProducts {
                card_monthly: row.card_monthly_product_id,
                card_yearly: row.card_yearly_product_id,
                apple_monthly: row.apple_monthly_product_id,
                apple_yearly: row.apple_yearly_product_id,
                google_monthly: row.google_monthly_product_id,
                google_yearly: row.google_yearly_product_id,
            },
            limits: EntitlementLimits {
                max_analyses_per_month: cap_from_column(row.max_analyses_per_month),
                max_storage_gb: cap_from_column(row.max_storage_gb),
                chat_enabled: row.chat_enabled,
                priority_support: row.priority_support,
            },
            sort_order: row.sort_order,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DbError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SubscriptionId(row.id),
            user_id: UserId(row.user_id),
            plan_id: PlanId(row.plan_id),
            status: parse_column("status", &row.status)?,
            billing_cycle: parse_column("billing_cycle", &row.billing_cycle)?,
            platform: parse_column("platform", &row.platform)?,
            platform_subscription_id: row.platform_subscription_id,
            platform_customer_id: row.platform_customer_id,
            amount: row.amount,
            currency: row.currency,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            trial_start: row.trial_start,
            trial_end: row.trial_end,
            cancel_at: row.cancel_at,
            canceled_at: row.canceled_at,
            cancel_reason: row.cancel_reason,
            last_payment_at: row.last_payment_at,
            next_payment_at: row.next_payment_at,
            last_event_at: row.last_event_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Subscription> for SubscriptionRow {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.0,
            user_id: sub.user_id.0,
            plan_id: sub.plan_id.0,
            status: sub.status.as_str().to_string(),
            billing_cycle: sub.billing_cycle.as_str().to_string(),
            platform: sub.platform.as_str().to_string(),
            platform_subscription_id: sub.platform_subscription_id.clone(),
            platform_customer_id: sub.platform_customer_id.clone(),
            amount: sub.amount,
            currency: sub.currency.clone(),
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            trial_start: sub.trial_start,
            trial_end: sub.trial_end,
            cancel_at: sub.cancel_at,
            canceled_at: sub.canceled_at,
            cancel_reason: sub.cancel_reason.clone(),
            last_payment_at: sub.last_payment_at,
            next_payment_at: sub.next_payment_at,
            last_event_at: sub.last_event_at,
            version: sub.version,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DbError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId(row.id),
            subscription_id: SubscriptionId(row.subscription_id),
            amount: row.amount,
            currency: row.currency,
            status: parse_column("status", &row.status)?,
            platform: parse_column("platform", &row.platform)?,
            platform_payment_id: row.platform_payment_id,
            payment_method: row.payment_method,
            paid_at: row.paid_at,
            failed_at: row.failed_at,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
        })
    }
}

impl From<UsageRow> for UsagePeriod {
    fn from(row: UsageRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId(row.user_id),
            period_start: row.period_start,
            period_end: row.period_end,
            analyses_used: row.analyses_used,
            storage_used_gb: row.storage_used_gb,
            chat_messages_used: row.chat_messages_used,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
