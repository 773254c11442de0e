//! Subscription types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ParseError, PlanId, SubscriptionId, UserId};

/// Canonical subscription status
///
/// The engine's own vocabulary; each payment platform's native statuses are
/// mapped onto it by the platform adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Created, awaiting first payment confirmation
    Pending,
    /// Paid and current
    Active,
    /// Inside a granted trial window
    Trialing,
    /// Renewal payment failed, awaiting recovery
    PastDue,
    /// Suspended on the platform side
    Paused,
    /// Ended by cancellation (terminal)
    Canceled,
    /// Ended without ever being paid, or lapsed (terminal)
    Expired,
}

impl SubscriptionStatus {
    /// All statuses, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Active,
        Self::Trialing,
        Self::PastDue,
        Self::Paused,
        Self::Canceled,
        Self::Expired,
    ];

    /// Storage/wire representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Trialing => "TRIALING",
            Self::PastDue => "PAST_DUE",
            Self::Paused => "PAUSED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
        }
    }

    /// No transition is accepted out of a terminal status
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }

    /// Whether this status can be the source of an entitlement
    pub const fn confers_entitlement(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::new("subscription status", s))
    }
}

/// Billing cycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Storage/wire representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    /// Nominal period length used when a platform gives no renewal date
    pub fn nominal_period(&self) -> Duration {
        match self {
            Self::Monthly => Duration::days(30),
            Self::Yearly => Duration::days(365),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MONTHLY" => Ok(Self::Monthly),
            "YEARLY" => Ok(Self::Yearly),
            _ => Err(ParseError::new("billing cycle", s)),
        }
    }
}

/// Payment platform a subscription is billed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    /// Card processor
    Card,
    /// Apple App Store
    Apple,
    /// Google Play Store
    Google,
}

impl Platform {
    /// Storage/wire representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "CARD",
            Self::Apple => "APPLE",
            Self::Google => "GOOGLE",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CARD" | "STRIPE" => Ok(Self::Card),
            "APPLE" | "APPLE_APP_STORE" => Ok(Self::Apple),
            "GOOGLE" | "GOOGLE_PLAY_STORE" => Ok(Self::Google),
            _ => Err(ParseError::new("platform", s)),
        }
    }
}

/// User subscription
///
/// `amount` is captured from the plan when the subscription is created and
/// never follows later plan price changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub platform: Platform,
    /// The platform's own identifier; absent while a card creation call is unresolved
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
    /// Newest platform event or local cancellation reflected in this row
    pub last_event_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every stored mutation
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// A scheduled cancellation has come due without being superseded by a renewal
    pub fn cancellation_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.cancel_at.is_some_and(|at| at <= now)
    }

    /// Whether this subscription grants its plan's entitlements at `now`
    pub fn is_entitled_at(&self, now: DateTime<Utc>) -> bool {
        self.status.confers_entitlement()
            && self.current_period_end > now
            && !self.cancellation_due(now)
    }
}
