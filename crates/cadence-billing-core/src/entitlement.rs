//! Entitlement gate
//!
//! Read-only composition of the subscription ledger, the usage ledger and
//! the plan catalog. A user without a qualifying subscription is measured
//! against the free entitlement; the gate never fails for that case.

use rust_decimal::Decimal;
use tracing::debug;

use cadence_types::{
    EntitlementCheck, EntitlementLimits, Feature, RemainingUsage, UsagePeriod, UsageReport, UserId,
};

use crate::catalog::PlanCatalog;
use crate::error::BillingError;
use crate::ledger::SubscriptionLedger;
use crate::usage::UsageLedger;

const NO_SUBSCRIPTION: &str = "No active subscription. Subscribe to a plan to use this feature";

/// Answers "is feature F usable now, and how much remains"
#[derive(Clone)]
pub struct EntitlementGate {
    ledger: SubscriptionLedger,
    usage: UsageLedger,
    catalog: PlanCatalog,
}

impl EntitlementGate {
    pub fn new(ledger: SubscriptionLedger, usage: UsageLedger, catalog: PlanCatalog) -> Self {
        Self {
            ledger,
            usage,
            catalog,
        }
    }

    /// Limits from the user's entitlement-bearing subscription, or `None`
    async fn limits(&self, user_id: UserId) -> Result<Option<EntitlementLimits>, BillingError> {
        let Some(subscription) = self.ledger.active_subscription(user_id).await? else {
            return Ok(None);
        };
        let plan = self.catalog.get_plan(subscription.plan_id).await?;
        Ok(Some(plan.limits))
    }

    /// Check one feature for a user
    pub async fn check(
        &self,
        user_id: UserId,
        feature: Feature,
    ) -> Result<EntitlementCheck, BillingError> {
        let limits = self.limits(user_id).await?;
        let usage = self.usage.get_usage(user_id).await?;

        let check = match limits {
            Some(limits) => evaluate(feature, &limits, &usage),
            None => {
                let mut check = evaluate(feature, &EntitlementLimits::free(), &usage);
                check.message = NO_SUBSCRIPTION.to_string();
                check
            }
        };

        debug!(
            user_id = %user_id,
            feature = %feature,
            allowed = check.allowed,
            "Checked entitlement"
        );
        Ok(check)
    }

    /// Current usage with the limits it is measured against
    pub async fn usage_report(&self, user_id: UserId) -> Result<UsageReport, BillingError> {
        let limits = self
            .limits(user_id)
            .await?
            .unwrap_or_else(EntitlementLimits::free);
        let usage = self.usage.get_usage(user_id).await?;
        let remaining_usage = remaining(&limits, &usage);

        Ok(UsageReport {
            usage,
            limits,
            remaining_usage,
        })
    }
}

/// Evaluate a feature against limits and usage
pub fn evaluate(
    feature: Feature,
    limits: &EntitlementLimits,
    usage: &UsagePeriod,
) -> EntitlementCheck {
    match feature {
        Feature::Analyses => match limits.max_analyses_per_month {
            None => EntitlementCheck {
                feature,
                allowed: true,
                remaining: None,
                limit: None,
                message: "Unlimited analyses".to_string(),
            },
            Some(cap) => {
                let left = (i64::from(cap) - usage.analyses_used).max(0);
                EntitlementCheck {
                    feature,
                    allowed: left > 0,
                    remaining: Some(Decimal::from(left)),
                    limit: Some(Decimal::from(cap)),
                    message: if left > 0 {
                        format!("{left} analyses remaining this month")
                    } else {
                        "Analysis limit reached for this month".to_string()
                    },
                }
            }
        },
        Feature::Storage => match limits.max_storage_gb {
            None => EntitlementCheck {
                feature,
                allowed: true,
                remaining: None,
                limit: None,
                message: "Unlimited storage".to_string(),
            },
            Some(cap) => {
                let left = (Decimal::from(cap) - usage.storage_used_gb).max(Decimal::ZERO);
                EntitlementCheck {
                    feature,
                    allowed: left > Decimal::ZERO,
                    remaining: Some(left),
                    limit: Some(Decimal::from(cap)),
                    message: if left > Decimal::ZERO {
                        format!("{left} GB storage remaining")
                    } else {
                        "Storage limit reached".to_string()
                    },
                }
            }
        },
        Feature::Chat => EntitlementCheck {
            feature,
            allowed: limits.chat_enabled,
            remaining: None,
            limit: None,
            message: if limits.chat_enabled {
                "AI Chat available".to_string()
            } else {
                "AI Chat not available in your plan".to_string()
            },
        },
    }
}

fn remaining(limits: &EntitlementLimits, usage: &UsagePeriod) -> RemainingUsage {
    RemainingUsage {
        analyses_remaining: limits
            .max_analyses_per_month
            .map(|cap| (i64::from(cap) - usage.analyses_used).max(0)),
        storage_remaining_gb: limits
            .max_storage_gb
            .map(|cap| (Decimal::from(cap) - usage.storage_used_gb).max(Decimal::ZERO)),
    }
}
