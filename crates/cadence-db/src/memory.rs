//! In-memory repositories
//!
//! DashMap-backed implementations of every repository trait. Each atomic
//! repository operation runs under a single shard lock, so these give the
//! same concurrency guarantees as the PostgreSQL statements they stand in for.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::*;
use crate::repo::*;

/// In-memory plan repository
#[derive(Default, Clone)]
pub struct MemoryPlanRepository {
    plans: Arc<DashMap<Uuid, PlanRow>>,
}

impl MemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for MemoryPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRow>> {
        Ok(self.plans.get(&id).map(|r| r.value().clone()))
    }

    async fn list_active(&self) -> DbResult<Vec<PlanRow>> {
        let mut plans: Vec<PlanRow> = self
            .plans
            .iter()
            .filter(|r| r.active)
            .map(|r| r.value().clone())
            .collect();
        plans.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(plans)
    }

    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRow> {
        let now = Utc::now();
        let row = PlanRow {
            id: plan.id,
            name: plan.name,
            description: plan.description,
            features: plan.features,
            monthly_price: plan.monthly_price,
            yearly_price: plan.yearly_price,
            card_monthly_product_id: plan.card_monthly_product_id,
            card_yearly_product_id: plan.card_yearly_product_id,
            apple_monthly_product_id: plan.apple_monthly_product_id,
            apple_yearly_product_id: plan.apple_yearly_product_id,
            google_monthly_product_id: plan.google_monthly_product_id,
            google_yearly_product_id: plan.google_yearly_product_id,
            max_analyses_per_month: plan.max_analyses_per_month,
            max_storage_gb: plan.max_storage_gb,
            chat_enabled: plan.chat_enabled,
            priority_support: plan.priority_support,
            sort_order: plan.sort_order,
            active: true,
            created_at: now,
            updated_at: now,
        };

        match self.plans.entry(row.id) {
            Entry::Occupied(_) => Err(DbError::Conflict("plan already exists".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn set_active(&self, id: Uuid, active: bool) -> DbResult<()> {
        let mut plan = self.plans.get_mut(&id).ok_or(DbError::NotFound)?;
        plan.active = active;
        plan.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory subscription repository
#[derive(Default, Clone)]
pub struct MemorySubscriptionRepository {
    subscriptions: Arc<DashMap<Uuid, SubscriptionRow>>,
    by_platform_id: Arc<DashMap<(String, String), Uuid>>,
}

impl MemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn user_rows(&self, user_id: Uuid) -> Vec<SubscriptionRow> {
        self.subscriptions
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Point `(platform, platform_id)` at `id`, failing if another row owns it.
    fn index_platform_id(&self, platform: &str, platform_id: &str, id: Uuid) -> DbResult<()> {
        match self
            .by_platform_id
            .entry((platform.to_string(), platform_id.to_string()))
        {
            Entry::Occupied(owner) if *owner.get() != id => Err(DbError::Conflict(
                "platform subscription id already exists".to_string(),
            )),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }
}

fn is_terminal_status(status: &str) -> bool {
    matches!(status, "CANCELED" | "EXPIRED")
}

#[async_trait]
impl SubscriptionRepository for MemorySubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        Ok(self.subscriptions.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_platform_id(
        &self,
        platform: &str,
        platform_subscription_id: &str,
    ) -> DbResult<Option<SubscriptionRow>> {
        let key = (platform.to_string(), platform_subscription_id.to_string());
        // Copy the id out so the index guard is dropped before the row lookup.
        let id = self.by_platform_id.get(&key).map(|id| *id.value());
        Ok(id.and_then(|id| self.subscriptions.get(&id).map(|r| r.value().clone())))
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &SubscriptionFilter,
    ) -> DbResult<(Vec<SubscriptionRow>, i64)> {
        let mut rows: Vec<SubscriptionRow> = self
            .user_rows(user_id)
            .into_iter()
            .filter(|r| filter.status.as_deref().map_or(true, |s| r.status == s))
            .filter(|r| filter.platform.as_deref().map_or(true, |p| r.platform == p))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn find_entitled_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SubscriptionRow>> {
        Ok(self
            .user_rows(user_id)
            .into_iter()
            .filter(|r| matches!(r.status.as_str(), "ACTIVE" | "TRIALING"))
            .filter(|r| r.current_period_end > now)
            .filter(|r| r.cancel_at.map_or(true, |at| at > now))
            .max_by_key(|r| r.created_at))
    }

    async fn list_cancellation_due(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u32,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let mut rows: Vec<SubscriptionRow> = self
            .subscriptions
            .iter()
            .filter(|r| !is_terminal_status(&r.status))
            .filter(|r| r.cancel_at.is_some_and(|at| at <= now))
            .filter(|r| after.map_or(true, |cursor| (r.cancel_at, r.id) > (Some(cursor.0), cursor.1)))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| (r.cancel_at, r.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn create(&self, row: SubscriptionRow) -> DbResult<SubscriptionRow> {
        if self.subscriptions.contains_key(&row.id) {
            return Err(DbError::Conflict("subscription already exists".to_string()));
        }
        if let Some(platform_id) = &row.platform_subscription_id {
            self.index_platform_id(&row.platform, platform_id, row.id)?;
        }
        self.subscriptions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn compare_and_swap(
        &self,
        row: &SubscriptionRow,
        expected_version: i64,
    ) -> DbResult<bool> {
        let Some(mut stored) = self.subscriptions.get_mut(&row.id) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        if row.platform_subscription_id != stored.platform_subscription_id {
            if let Some(platform_id) = &row.platform_subscription_id {
                self.index_platform_id(&row.platform, platform_id, row.id)?;
            }
            if let Some(previous) = &stored.platform_subscription_id {
                self.by_platform_id
                    .remove(&(stored.platform.clone(), previous.clone()));
            }
        }

        let created_at = stored.created_at;
        *stored = SubscriptionRow {
            version: expected_version + 1,
            created_at,
            ..row.clone()
        };
        Ok(true)
    }
}

/// In-memory payment repository
#[derive(Default, Clone)]
pub struct MemoryPaymentRepository {
    payments: Arc<DashMap<(String, String), PaymentRow>>,
}

impl MemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn insert_if_absent(&self, payment: CreatePayment) -> DbResult<bool> {
        let key = (payment.platform.clone(), payment.platform_payment_id.clone());
        match self.payments.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(PaymentRow {
                    id: payment.id,
                    subscription_id: payment.subscription_id,
                    amount: payment.amount,
                    currency: payment.currency,
                    status: payment.status,
                    platform: payment.platform,
                    platform_payment_id: payment.platform_payment_id,
                    payment_method: payment.payment_method,
                    paid_at: payment.paid_at,
                    failed_at: payment.failed_at,
                    refunded_at: None,
                    created_at: Utc::now(),
                });
                Ok(true)
            }
        }
    }

    async fn list_by_subscription(&self, subscription_id: Uuid) -> DbResult<Vec<PaymentRow>> {
        let mut rows: Vec<PaymentRow> = self
            .payments
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

type UsageKey = (Uuid, NaiveDate, NaiveDate);

/// In-memory usage repository
#[derive(Default, Clone)]
pub struct MemoryUsageRepository {
    periods: Arc<DashMap<UsageKey, UsageRow>>,
}

impl MemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn empty_usage_row(user_id: Uuid, period_start: NaiveDate, period_end: NaiveDate) -> UsageRow {
    let now = Utc::now();
    UsageRow {
        id: Uuid::new_v4(),
        user_id,
        period_start,
        period_end,
        analyses_used: 0,
        storage_used_gb: Decimal::ZERO,
        chat_messages_used: 0,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl UsageRepository for MemoryUsageRepository {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> DbResult<UsageRow> {
        let row = self
            .periods
            .entry((user_id, period_start, period_end))
            .or_insert_with(|| empty_usage_row(user_id, period_start, period_end));
        Ok(row.value().clone())
    }

    async fn increment(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
        delta: &UsageIncrement,
    ) -> DbResult<UsageRow> {
        let mut row = self
            .periods
            .entry((user_id, period_start, period_end))
            .or_insert_with(|| empty_usage_row(user_id, period_start, period_end));
        row.analyses_used += delta.analyses;
        row.storage_used_gb += delta.storage_gb;
        row.chat_messages_used += delta.chat_messages;
        row.updated_at = Utc::now();
        Ok(row.value().clone())
    }
}

/// In-memory webhook event repository
#[derive(Default, Clone)]
pub struct MemoryWebhookEventRepository {
    events: Arc<DashMap<(String, String), WebhookEventRow>>,
}

impl MemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryWebhookEventRepository {
    async fn claim(
        &self,
        platform: &str,
        platform_event_id: &str,
        event_type: &str,
        stale_before: DateTime<Utc>,
    ) -> DbResult<bool> {
        let key = (platform.to_string(), platform_event_id.to_string());
        match self.events.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(WebhookEventRow {
                    platform: platform.to_string(),
                    platform_event_id: platform_event_id.to_string(),
                    event_type: event_type.to_string(),
                    outcome: None,
                    claimed_at: Utc::now(),
                    processed_at: None,
                });
                Ok(true)
            }
            Entry::Occupied(mut existing) => {
                let event = existing.get_mut();
                if event.processed_at.is_none() && event.claimed_at < stale_before {
                    event.claimed_at = Utc::now();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn complete(
        &self,
        platform: &str,
        platform_event_id: &str,
        outcome: &str,
    ) -> DbResult<()> {
        let key = (platform.to_string(), platform_event_id.to_string());
        if let Some(mut event) = self.events.get_mut(&key) {
            event.outcome = Some(outcome.to_string());
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn release(&self, platform: &str, platform_event_id: &str) -> DbResult<()> {
        let key = (platform.to_string(), platform_event_id.to_string());
        self.events.remove_if(&key, |_, event| event.processed_at.is_none());
        Ok(())
    }

    async fn find(
        &self,
        platform: &str,
        platform_event_id: &str,
    ) -> DbResult<Option<WebhookEventRow>> {
        let key = (platform.to_string(), platform_event_id.to_string());
        Ok(self.events.get(&key).map(|r| r.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription_row(user_id: Uuid, status: &str) -> SubscriptionRow {
        let now = Utc::now();
        SubscriptionRow {
            id: Uuid::new_v4(),
            user_id,
            plan_id: Uuid::new_v4(),
            status: status.to_string(),
            billing_cycle: "MONTHLY".to_string(),
            platform: "CARD".to_string(),
            platform_subscription_id: None,
            platform_customer_id: None,
            amount: Decimal::new(999, 2),
            currency: "USD".to_string(),
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            trial_start: None,
            trial_end: None,
            cancel_at: None,
            canceled_at: None,
            cancel_reason: None,
            last_payment_at: None,
            next_payment_at: None,
            last_event_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_version() {
        let repo = MemorySubscriptionRepository::new();
        let row = repo
            .create(subscription_row(Uuid::new_v4(), "PENDING"))
            .await
            .unwrap();

        let mut first = row.clone();
        first.status = "ACTIVE".to_string();
        assert!(repo.compare_and_swap(&first, 0).await.unwrap());

        let mut second = row.clone();
        second.status = "CANCELED".to_string();
        assert!(!repo.compare_and_swap(&second, 0).await.unwrap());

        let stored = repo.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "ACTIVE");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn attaching_platform_id_indexes_row() {
        let repo = MemorySubscriptionRepository::new();
        let row = repo
            .create(subscription_row(Uuid::new_v4(), "PENDING"))
            .await
            .unwrap();

        let mut attached = row.clone();
        attached.platform_subscription_id = Some("sub_123".to_string());
        assert!(repo.compare_and_swap(&attached, 0).await.unwrap());

        let found = repo.find_by_platform_id("CARD", "sub_123").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(row.id));
    }

    #[tokio::test]
    async fn duplicate_platform_id_conflicts() {
        let repo = MemorySubscriptionRepository::new();
        let mut a = subscription_row(Uuid::new_v4(), "ACTIVE");
        a.platform_subscription_id = Some("sub_dup".to_string());
        let mut b = subscription_row(Uuid::new_v4(), "ACTIVE");
        b.platform_subscription_id = Some("sub_dup".to_string());

        repo.create(a).await.unwrap();
        let err = repo.create(b).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn entitled_lookup_skips_due_cancellations() {
        let repo = MemorySubscriptionRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let mut due = subscription_row(user, "ACTIVE");
        due.cancel_at = Some(now - Duration::minutes(1));
        repo.create(due.clone()).await.unwrap();

        assert!(repo.find_entitled_by_user(user, now).await.unwrap().is_none());

        let listed = repo.list_cancellation_due(now, None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
    }

    #[tokio::test]
    async fn cancellation_listing_resumes_after_cursor() {
        let repo = MemorySubscriptionRepository::new();
        let now = Utc::now();
        let at = now - Duration::hours(1);
        for _ in 0..3 {
            let mut row = subscription_row(Uuid::new_v4(), "ACTIVE");
            row.cancel_at = Some(at);
            repo.create(row).await.unwrap();
        }

        let first = repo.list_cancellation_due(now, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].id < first[1].id);

        let cursor = (at, first[1].id);
        let rest = repo.list_cancellation_due(now, Some(cursor), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].id > first[1].id);
    }

    #[tokio::test]
    async fn list_by_user_paginates_and_filters() {
        let repo = MemorySubscriptionRepository::new();
        let user = Uuid::new_v4();
        for i in 0..5 {
            let mut row = subscription_row(user, if i % 2 == 0 { "ACTIVE" } else { "CANCELED" });
            row.created_at = Utc::now() + Duration::seconds(i);
            repo.create(row).await.unwrap();
        }
        repo.create(subscription_row(Uuid::new_v4(), "ACTIVE"))
            .await
            .unwrap();

        let filter = SubscriptionFilter {
            limit: 2,
            ..Default::default()
        };
        let (page, total) = repo.list_by_user(user, &filter).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at > page[1].created_at);

        let filter = SubscriptionFilter {
            status: Some("ACTIVE".to_string()),
            ..Default::default()
        };
        let (page, total) = repo.list_by_user(user, &filter).await.unwrap();
        assert_eq!(total, 3);
        assert!(page.iter().all(|r| r.status == "ACTIVE"));
    }

    #[tokio::test]
    async fn payments_deduplicate_on_platform_id() {
        let repo = MemoryPaymentRepository::new();
        let subscription_id = Uuid::new_v4();
        let payment = CreatePayment {
            id: Uuid::new_v4(),
            subscription_id,
            amount: Decimal::new(999, 2),
            currency: "USD".to_string(),
            status: "SUCCEEDED".to_string(),
            platform: "CARD".to_string(),
            platform_payment_id: "pi_1".to_string(),
            payment_method: Some("card".to_string()),
            paid_at: Some(Utc::now()),
            failed_at: None,
        };

        assert!(repo.insert_if_absent(payment.clone()).await.unwrap());
        assert!(!repo
            .insert_if_absent(CreatePayment {
                id: Uuid::new_v4(),
                ..payment
            })
            .await
            .unwrap());
        assert_eq!(repo.list_by_subscription(subscription_id).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let repo = MemoryUsageRepository::new();
        let user = Uuid::new_v4();
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();

        let tasks = (0..50).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.increment(
                    user,
                    start,
                    end,
                    &UsageIncrement {
                        analyses: 1,
                        ..Default::default()
                    },
                )
                .await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let row = repo.get_or_create(user, start, end).await.unwrap();
        assert_eq!(row.analyses_used, 50);
    }

    #[tokio::test]
    async fn webhook_claim_is_exclusive_until_released() {
        let repo = MemoryWebhookEventRepository::new();
        let stale_before = Utc::now() - Duration::minutes(5);

        assert!(repo.claim("CARD", "evt_1", "invoice.paid", stale_before).await.unwrap());
        assert!(!repo.claim("CARD", "evt_1", "invoice.paid", stale_before).await.unwrap());

        repo.release("CARD", "evt_1").await.unwrap();
        assert!(repo.claim("CARD", "evt_1", "invoice.paid", stale_before).await.unwrap());

        repo.complete("CARD", "evt_1", "applied").await.unwrap();
        repo.release("CARD", "evt_1").await.unwrap();
        let far_future = Utc::now() + Duration::days(1);
        assert!(!repo.claim("CARD", "evt_1", "invoice.paid", far_future).await.unwrap());

        let event = repo.find("CARD", "evt_1").await.unwrap().unwrap();
        assert_eq!(event.outcome.as_deref(), Some("applied"));
    }

    #[tokio::test]
    async fn stale_claim_can_be_taken_over() {
        let repo = MemoryWebhookEventRepository::new();
        assert!(repo
            .claim("APPLE", "n_1", "DID_RENEW", Utc::now() - Duration::minutes(5))
            .await
            .unwrap());
        assert!(repo
            .claim("APPLE", "n_1", "DID_RENEW", Utc::now() + Duration::seconds(1))
            .await
            .unwrap());
    }
}
