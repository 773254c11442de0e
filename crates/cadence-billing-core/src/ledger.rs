//! Subscription ledger
//!
//! Owns every write to a subscription row. Each transition is computed by
//! the pure [`transition::apply`](crate::transition::apply) and persisted with
//! a version compare-and-swap, retried on contention, so concurrent webhook
//! deliveries and user calls never lose an update.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use cadence_db::{DbError, SubscriptionFilter, SubscriptionRepository, SubscriptionRow};
use cadence_types::{
    BillingCycle, PlanId, Platform, Subscription, SubscriptionId, SubscriptionStatus, UserId,
};

use crate::clock::Clock;
use crate::error::BillingError;
use crate::transition::{apply, Applied, BillingPeriod, Transition};

const MAX_CAS_ATTEMPTS: usize = 5;
const SCAN_PAGE_SIZE: u32 = 100;
const SUPERSEDED_REASON: &str = "superseded";

/// Fields of a subscription about to be created
#[derive(Debug, Clone)]
pub struct SubscriptionDraft {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub platform: Platform,
    pub platform_subscription_id: Option<String>,
    pub platform_customer_id: Option<String>,
    /// Price captured from the plan
    pub amount: Decimal,
    pub currency: String,
    pub period: BillingPeriod,
}

/// Result of a ledger mutation
#[derive(Debug, Clone)]
pub struct LedgerUpdate {
    /// Stored subscription after the call
    pub subscription: Subscription,
    /// Whether the call changed the stored row
    pub changed: bool,
}

/// Pagination metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit))
        };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }
}

/// A page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Canonical per-user subscription records
#[derive(Clone)]
pub struct SubscriptionLedger {
    subscriptions: Arc<dyn SubscriptionRepository>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionLedger {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscriptions,
            clock,
        }
    }

    /// Insert a new subscription
    #[instrument(skip(self, draft), fields(user_id = %draft.user_id, platform = %draft.platform))]
    pub async fn create(&self, draft: SubscriptionDraft) -> Result<Subscription, BillingError> {
        let now = self.clock.now();
        let next_payment_at = draft
            .status
            .confers_entitlement()
            .then_some(draft.period.end);

        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id: draft.user_id,
            plan_id: draft.plan_id,
            status: draft.status,
            billing_cycle: draft.billing_cycle,
            platform: draft.platform,
            platform_subscription_id: draft.platform_subscription_id,
            platform_customer_id: draft.platform_customer_id,
            amount: draft.amount,
            currency: draft.currency,
            current_period_start: draft.period.start,
            current_period_end: draft.period.end,
            trial_start: None,
            trial_end: None,
            cancel_at: None,
            canceled_at: None,
            cancel_reason: None,
            last_payment_at: None,
            next_payment_at,
            last_event_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let row = self
            .subscriptions
            .create(SubscriptionRow::from(&subscription))
            .await
            .map_err(|e| match e {
                DbError::Conflict(msg) => BillingError::StateConflict(msg),
                other => other.into(),
            })?;

        let created = Subscription::try_from(row)?;
        info!(subscription_id = %created.id, status = %created.status, "Created subscription");
        Ok(created)
    }

    async fn load(&self, id: SubscriptionId) -> Result<Subscription, BillingError> {
        let row = self
            .subscriptions
            .find_by_id(id.0)
            .await?
            .ok_or(BillingError::SubscriptionNotFound)?;
        Ok(Subscription::try_from(row)?)
    }

    /// Read-modify-write one subscription under optimistic concurrency
    async fn update_with<F>(&self, id: SubscriptionId, f: F) -> Result<LedgerUpdate, BillingError>
    where
        F: Fn(&Subscription) -> Result<Applied, BillingError> + Send + Sync,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load(id).await?;

            let mut next = match f(&current)? {
                Applied::Unchanged => {
                    return Ok(LedgerUpdate {
                        subscription: current,
                        changed: false,
                    })
                }
                Applied::Changed(next) => next,
            };

            let row = SubscriptionRow::from(&next);
            let swapped = self
                .subscriptions
                .compare_and_swap(&row, current.version)
                .await
                .map_err(|e| match e {
                    DbError::Conflict(msg) => BillingError::StateConflict(msg),
                    other => other.into(),
                })?;

            if swapped {
                next.version = current.version + 1;
                return Ok(LedgerUpdate {
                    subscription: next,
                    changed: true,
                });
            }
            debug!(subscription_id = %id, attempt, "Subscription version moved; retrying");
        }

        warn!(subscription_id = %id, "Gave up on contended subscription update");
        Err(BillingError::StateConflict(
            "subscription is being modified concurrently".to_string(),
        ))
    }

    /// Apply a canonical transition
    #[instrument(skip(self, transition), fields(transition = transition.name()))]
    pub async fn apply(
        &self,
        id: SubscriptionId,
        transition: &Transition,
    ) -> Result<LedgerUpdate, BillingError> {
        let now = self.clock.now();
        let update = self
            .update_with(id, |current| apply(current, transition, now))
            .await?;

        if update.changed {
            info!(
                subscription_id = %id,
                status = %update.subscription.status,
                "Applied subscription transition"
            );
        }
        Ok(update)
    }

    /// Record the platform identifiers of a subscription created before its
    /// platform call completed
    pub async fn attach_platform_ids(
        &self,
        id: SubscriptionId,
        platform_subscription_id: &str,
        customer_id: Option<&str>,
    ) -> Result<Subscription, BillingError> {
        let now = self.clock.now();
        let update = self
            .update_with(id, |current| {
                match current.platform_subscription_id.as_deref() {
                    Some(existing) if existing == platform_subscription_id => {
                        if customer_id.is_none()
                            || current.platform_customer_id.as_deref() == customer_id
                        {
                            return Ok(Applied::Unchanged);
                        }
                    }
                    Some(_) => {
                        return Err(BillingError::StateConflict(
                            "subscription is already linked to another platform subscription"
                                .to_string(),
                        ))
                    }
                    None => {}
                }

                let mut next = current.clone();
                next.platform_subscription_id = Some(platform_subscription_id.to_string());
                if let Some(customer_id) = customer_id {
                    next.platform_customer_id = Some(customer_id.to_string());
                }
                next.updated_at = now;
                Ok(Applied::Changed(next))
            })
            .await?;

        Ok(update.subscription)
    }

    /// Get a subscription, finalizing a deferred cancellation that has come due
    pub async fn get(&self, id: SubscriptionId) -> Result<Subscription, BillingError> {
        let subscription = self.load(id).await?;
        self.settle(subscription).await
    }

    /// Get a subscription owned by `user_id`; another user's subscription is `NotFound`
    pub async fn get_for_user(
        &self,
        user_id: UserId,
        id: SubscriptionId,
    ) -> Result<Subscription, BillingError> {
        let subscription = self.get(id).await?;
        if subscription.user_id != user_id {
            return Err(BillingError::SubscriptionNotFound);
        }
        Ok(subscription)
    }

    async fn settle(&self, subscription: Subscription) -> Result<Subscription, BillingError> {
        if !subscription.cancellation_due(self.clock.now()) {
            return Ok(subscription);
        }
        let update = self
            .apply(subscription.id, &Transition::FinalizeCancellation)
            .await?;
        Ok(update.subscription)
    }

    /// Find a subscription by the platform's identifier
    pub async fn find_by_platform_id(
        &self,
        platform: Platform,
        platform_subscription_id: &str,
    ) -> Result<Option<Subscription>, BillingError> {
        self.subscriptions
            .find_by_platform_id(platform.as_str(), platform_subscription_id)
            .await?
            .map(Subscription::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// A user's subscriptions, newest first
    pub async fn list_user_subscriptions(
        &self,
        user_id: UserId,
        filter: &SubscriptionFilter,
    ) -> Result<Page<Subscription>, BillingError> {
        if filter.page == 0 || filter.limit == 0 || filter.limit > SCAN_PAGE_SIZE {
            return Err(BillingError::Validation(format!(
                "page must be at least 1 and limit between 1 and {SCAN_PAGE_SIZE}"
            )));
        }

        let (rows, total) = self.subscriptions.list_by_user(user_id.0, filter).await?;
        let items = rows
            .into_iter()
            .map(Subscription::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            pagination: Pagination::new(
                filter.page,
                filter.limit,
                u64::try_from(total).unwrap_or_default(),
            ),
        })
    }

    /// The subscription the user's entitlements come from, if any
    pub async fn active_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, BillingError> {
        self.subscriptions
            .find_entitled_by_user(user_id.0, self.clock.now())
            .await?
            .map(Subscription::try_from)
            .transpose()
            .map_err(Into::into)
    }

    async fn all_for_user(&self, user_id: UserId) -> Result<Vec<Subscription>, BillingError> {
        let mut all = Vec::new();
        let mut filter = SubscriptionFilter {
            limit: SCAN_PAGE_SIZE,
            ..Default::default()
        };
        loop {
            let (rows, total) = self.subscriptions.list_by_user(user_id.0, &filter).await?;
            let fetched = rows.len();
            for row in rows {
                all.push(Subscription::try_from(row)?);
            }
            if fetched == 0 || all.len() as i64 >= total {
                return Ok(all);
            }
            filter.page += 1;
        }
    }

    /// Keep one entitlement source per user.
    ///
    /// The latest-created entitled subscription wins; every other entitled
    /// subscription gets a deferred cancellation. Returns the subscriptions
    /// that were superseded.
    #[instrument(skip(self))]
    pub async fn enforce_single_entitlement(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Subscription>, BillingError> {
        let now = self.clock.now();
        let mut entitled: Vec<Subscription> = self
            .all_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_entitled_at(now))
            .collect();
        if entitled.len() < 2 {
            return Ok(Vec::new());
        }

        entitled.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        let winner = entitled.remove(0);

        let supersede = Transition::Cancel {
            immediately: false,
            reason: Some(SUPERSEDED_REASON.to_string()),
        };
        let mut superseded = Vec::new();
        for loser in entitled.into_iter().filter(|s| s.cancel_at.is_none()) {
            let update = self.apply(loser.id, &supersede).await?;
            if update.changed {
                info!(
                    subscription_id = %loser.id,
                    kept = %winner.id,
                    "Superseded subscription scheduled for cancellation"
                );
                metrics::counter!("billing_subscription_superseded_total").increment(1);
                superseded.push(update.subscription);
            }
        }
        Ok(superseded)
    }

    /// Finalize every deferred cancellation that has come due
    #[instrument(skip(self))]
    pub async fn sweep_due_cancellations(&self) -> Result<Vec<Subscription>, BillingError> {
        let now = self.clock.now();
        let mut finalized = Vec::new();
        // Keyset cursor so rows that keep failing cannot hide later ones
        let mut after = None;
        loop {
            let due = self
                .subscriptions
                .list_cancellation_due(now, after, SCAN_PAGE_SIZE)
                .await?;
            let fetched = due.len();

            for row in due {
                after = row.cancel_at.map(|at| (at, row.id));
                let id = SubscriptionId(row.id);
                match self.apply(id, &Transition::FinalizeCancellation).await {
                    Ok(update) if update.changed => finalized.push(update.subscription),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(subscription_id = %id, error = %e, "Failed to finalize cancellation")
                    }
                }
            }
            if fetched < SCAN_PAGE_SIZE as usize {
                break;
            }
        }

        if !finalized.is_empty() {
            info!(count = finalized.len(), "Finalized due cancellations");
        }
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use cadence_db::memory::MemorySubscriptionRepository;
    use chrono::{Duration, TimeZone, Utc};

    fn ledger() -> (SubscriptionLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        ));
        let ledger = SubscriptionLedger::new(
            Arc::new(MemorySubscriptionRepository::new()),
            clock.clone(),
        );
        (ledger, clock)
    }

    fn draft(
        user_id: UserId,
        status: SubscriptionStatus,
        clock: &ManualClock,
    ) -> SubscriptionDraft {
        let now = clock.now();
        SubscriptionDraft {
            user_id,
            plan_id: PlanId::new(),
            status,
            billing_cycle: BillingCycle::Monthly,
            platform: Platform::Card,
            platform_subscription_id: None,
            platform_customer_id: None,
            amount: Decimal::new(999, 2),
            currency: "USD".to_string(),
            period: BillingPeriod::new(now, now + Duration::days(30)).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_apply_bumps_version() {
        let (ledger, clock) = ledger();
        let sub = ledger
            .create(draft(UserId::new(), SubscriptionStatus::Pending, &clock))
            .await
            .unwrap();

        let update = ledger
            .apply(
                sub.id,
                &Transition::Activate {
                    period: None,
                    trial: None,
                },
            )
            .await
            .unwrap();
        assert!(update.changed);
        assert_eq!(update.subscription.version, sub.version + 1);
        assert_eq!(ledger.get(sub.id).await.unwrap().status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_other_users_subscription_is_not_found() {
        let (ledger, clock) = ledger();
        let sub = ledger
            .create(draft(UserId::new(), SubscriptionStatus::Active, &clock))
            .await
            .unwrap();

        assert!(matches!(
            ledger.get_for_user(UserId::new(), sub.id).await,
            Err(BillingError::SubscriptionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_due_cancellation_is_finalized_on_read() {
        let (ledger, clock) = ledger();
        let sub = ledger
            .create(draft(UserId::new(), SubscriptionStatus::Active, &clock))
            .await
            .unwrap();
        ledger
            .apply(
                sub.id,
                &Transition::Cancel {
                    immediately: false,
                    reason: None,
                },
            )
            .await
            .unwrap();

        clock.advance(Duration::days(31));
        let read = ledger.get(sub.id).await.unwrap();
        assert_eq!(read.status, SubscriptionStatus::Canceled);
        assert_eq!(read.canceled_at, Some(sub.current_period_end));
    }

    #[tokio::test]
    async fn test_attach_platform_ids_conflicts_on_relink() {
        let (ledger, clock) = ledger();
        let sub = ledger
            .create(draft(UserId::new(), SubscriptionStatus::Pending, &clock))
            .await
            .unwrap();

        let linked = ledger
            .attach_platform_ids(sub.id, "sub_1", Some("cus_1"))
            .await
            .unwrap();
        assert_eq!(linked.platform_subscription_id.as_deref(), Some("sub_1"));

        // Same ids again is a no-op
        ledger.attach_platform_ids(sub.id, "sub_1", None).await.unwrap();

        assert!(matches!(
            ledger.attach_platform_ids(sub.id, "sub_2", None).await,
            Err(BillingError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_created_entitlement_wins() {
        let (ledger, clock) = ledger();
        let user = UserId::new();
        let older = ledger
            .create(draft(user, SubscriptionStatus::Active, &clock))
            .await
            .unwrap();
        clock.advance(Duration::minutes(5));
        let newer = ledger
            .create(draft(user, SubscriptionStatus::Active, &clock))
            .await
            .unwrap();

        let superseded = ledger.enforce_single_entitlement(user).await.unwrap();
        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].id, older.id);
        assert_eq!(superseded[0].cancel_reason.as_deref(), Some("superseded"));

        let active = ledger.active_subscription(user).await.unwrap().unwrap();
        assert_eq!(active.id, newer.id);

        // Already superseded subscriptions are left alone
        assert!(ledger.enforce_single_entitlement(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pagination() {
        let (ledger, clock) = ledger();
        let user = UserId::new();
        for _ in 0..5 {
            ledger
                .create(draft(user, SubscriptionStatus::Pending, &clock))
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let filter = SubscriptionFilter {
            page: 2,
            limit: 2,
            ..Default::default()
        };
        let page = ledger.list_user_subscriptions(user, &filter).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination, Pagination::new(2, 2, 5));
        assert_eq!(page.pagination.pages, 3);

        let bad = SubscriptionFilter {
            page: 0,
            ..Default::default()
        };
        assert!(matches!(
            ledger.list_user_subscriptions(user, &bad).await,
            Err(BillingError::Validation(_))
        ));
    }
}
