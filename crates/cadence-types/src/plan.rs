//! Subscription plan types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{BillingCycle, Platform, PlanId};

/// Entitlement limits granted by a plan
///
/// An absent cap means unlimited. The implicit free entitlement is modelled
/// with zero caps rather than absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementLimits {
    /// Analyses allowed per calendar month
    pub max_analyses_per_month: Option<u32>,
    /// Storage allowance in whole gigabytes
    pub max_storage_gb: Option<u32>,
    /// AI chat access
    #[serde(default)]
    pub chat_enabled: bool,
    /// Priority support access
    #[serde(default)]
    pub priority_support: bool,
}

impl EntitlementLimits {
    /// Limits applied to a user without a qualifying subscription
    pub const fn free() -> Self {
        Self {
            max_analyses_per_month: Some(0),
            max_storage_gb: Some(0),
            chat_enabled: false,
            priority_support: false,
        }
    }
}

/// Platform product identifiers, at most one per platform per cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProducts {
    pub card_monthly: Option<String>,
    pub card_yearly: Option<String>,
    pub apple_monthly: Option<String>,
    pub apple_yearly: Option<String>,
    pub google_monthly: Option<String>,
    pub google_yearly: Option<String>,
}

impl PlatformProducts {
    /// Product identifier for a platform and billing cycle
    pub fn get(&self, platform: Platform, cycle: BillingCycle) -> Option<&str> {
        let id = match (platform, cycle) {
            (Platform::Card, BillingCycle::Monthly) => &self.card_monthly,
            (Platform::Card, BillingCycle::Yearly) => &self.card_yearly,
            (Platform::Apple, BillingCycle::Monthly) => &self.apple_monthly,
            (Platform::Apple, BillingCycle::Yearly) => &self.apple_yearly,
            (Platform::Google, BillingCycle::Monthly) => &self.google_monthly,
            (Platform::Google, BillingCycle::Yearly) => &self.google_yearly,
        };
        id.as_deref()
    }
}

/// Subscribable plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    pub products: PlatformProducts,
    pub limits: EntitlementLimits,
    pub sort_order: i32,
    /// Retired plans stay resolvable but accept no new subscriptions
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Price charged per period for a billing cycle
    pub fn price_for(&self, cycle: BillingCycle) -> Decimal {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Yearly => self.yearly_price,
        }
    }
}

/// Input for creating a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    #[serde(default)]
    pub products: PlatformProducts,
    #[serde(default)]
    pub limits: EntitlementLimits,
    #[serde(default)]
    pub sort_order: i32,
}

impl NewPlan {
    /// Check the plan invariants, returning every violation found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if self.monthly_price < Decimal::ZERO {
            problems.push("monthly_price must be >= 0".to_string());
        }
        if self.yearly_price < Decimal::ZERO {
            problems.push("yearly_price must be >= 0".to_string());
        }
        if self.limits.max_analyses_per_month == Some(0) {
            problems.push("max_analyses_per_month must be positive when set".to_string());
        }
        if self.limits.max_storage_gb == Some(0) {
            problems.push("max_storage_gb must be positive when set".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
