//! Plan catalog

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, instrument};

use cadence_db::{CreatePlan, DbError, PlanRepository};
use cadence_types::{BillingCycle, NewPlan, Plan, PlanId, Platform};

use crate::error::BillingError;

const ACTIVE_PLANS_KEY: &str = "active";

/// Read model of subscribable plans with an in-process cache
#[derive(Clone)]
pub struct PlanCatalog {
    plans: Arc<dyn PlanRepository>,
    /// plan_id -> plan
    by_id: Cache<PlanId, Plan>,
    /// Single entry holding the ordered active plan list
    active: Cache<&'static str, Arc<Vec<Plan>>>,
}

impl PlanCatalog {
    /// Create a catalog caching plans for five minutes
    pub fn new(plans: Arc<dyn PlanRepository>) -> Self {
        Self::with_cache_duration(plans, Duration::from_secs(300))
    }

    /// Create with custom cache duration
    pub fn with_cache_duration(plans: Arc<dyn PlanRepository>, cache_duration: Duration) -> Self {
        Self {
            plans,
            by_id: Cache::builder()
                .time_to_live(cache_duration)
                .max_capacity(1_000)
                .build(),
            active: Cache::builder()
                .time_to_live(cache_duration)
                .max_capacity(1)
                .build(),
        }
    }

    /// Validate and persist a new plan
    #[instrument(skip(self, plan), fields(name = %plan.name))]
    pub async fn create_plan(&self, plan: NewPlan) -> Result<Plan, BillingError> {
        plan.validate()
            .map_err(|problems| BillingError::Validation(problems.join("; ")))?;

        let input = CreatePlan {
            id: PlanId::new().0,
            name: plan.name.trim().to_string(),
            description: plan.description,
            features: plan.features,
            monthly_price: plan.monthly_price,
            yearly_price: plan.yearly_price,
            card_monthly_product_id: plan.products.card_monthly,
            card_yearly_product_id: plan.products.card_yearly,
            apple_monthly_product_id: plan.products.apple_monthly,
            apple_yearly_product_id: plan.products.apple_yearly,
            google_monthly_product_id: plan.products.google_monthly,
            google_yearly_product_id: plan.products.google_yearly,
            max_analyses_per_month: cap_to_column(
                "max_analyses_per_month",
                plan.limits.max_analyses_per_month,
            )?,
            max_storage_gb: cap_to_column("max_storage_gb", plan.limits.max_storage_gb)?,
            chat_enabled: plan.limits.chat_enabled,
            priority_support: plan.limits.priority_support,
            sort_order: plan.sort_order,
        };

        let created: Plan = self.plans.create(input).await?.into();
        self.active.invalidate(ACTIVE_PLANS_KEY).await;

        info!(plan_id = %created.id, "Created subscription plan");
        Ok(created)
    }

    /// Active plans ordered by sort order ascending
    pub async fn list_active_plans(&self) -> Result<Vec<Plan>, BillingError> {
        if let Some(plans) = self.active.get(ACTIVE_PLANS_KEY).await {
            return Ok(plans.as_ref().clone());
        }

        let plans: Vec<Plan> = self
            .plans
            .list_active()
            .await?
            .into_iter()
            .map(Plan::from)
            .collect();

        self.active
            .insert(ACTIVE_PLANS_KEY, Arc::new(plans.clone()))
            .await;
        Ok(plans)
    }

    /// Get a plan by id, active or retired
    pub async fn get_plan(&self, id: PlanId) -> Result<Plan, BillingError> {
        if let Some(plan) = self.by_id.get(&id).await {
            return Ok(plan);
        }

        let plan: Plan = self
            .plans
            .find_by_id(id.0)
            .await?
            .ok_or(BillingError::PlanNotFound)?
            .into();

        self.by_id.insert(id, plan.clone()).await;
        Ok(plan)
    }

    /// Retire a plan so no new subscriptions can be created against it
    #[instrument(skip(self))]
    pub async fn retire_plan(&self, id: PlanId) -> Result<Plan, BillingError> {
        self.plans.set_active(id.0, false).await.map_err(|e| match e {
            DbError::NotFound => BillingError::PlanNotFound,
            other => other.into(),
        })?;

        self.by_id.invalidate(&id).await;
        self.active.invalidate(ACTIVE_PLANS_KEY).await;

        info!(plan_id = %id, "Retired subscription plan");
        self.get_plan(id).await
    }

    /// Get a plan that accepts new subscriptions
    pub async fn subscribable_plan(&self, id: PlanId) -> Result<Plan, BillingError> {
        let plan = self.get_plan(id).await?;
        if !plan.active {
            debug!(plan_id = %id, "Rejected subscription to retired plan");
            return Err(BillingError::Validation(
                "subscription plan is no longer available".to_string(),
            ));
        }
        Ok(plan)
    }
}

/// Resolve the platform product a plan sells for a billing cycle
pub fn product_for(
    plan: &Plan,
    platform: Platform,
    cycle: BillingCycle,
) -> Result<&str, BillingError> {
    plan.products.get(platform, cycle).ok_or_else(|| {
        BillingError::Validation(format!("{cycle} billing not available for this plan"))
    })
}

fn cap_to_column(field: &str, cap: Option<u32>) -> Result<Option<i32>, BillingError> {
    cap.map(i32::try_from)
        .transpose()
        .map_err(|_| BillingError::Validation(format!("{field} is too large")))
}
