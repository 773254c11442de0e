//! Subscription repository that fails listings and writes on demand

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use uuid::Uuid;

use cadence_db::memory::MemorySubscriptionRepository;
use cadence_db::{DbError, DbResult, SubscriptionFilter, SubscriptionRepository, SubscriptionRow};

/// In-memory subscriptions whose next `list_by_user` can be made to fail,
/// and whose writes to chosen rows always fail
#[derive(Default)]
pub struct FlakySubscriptions {
    inner: MemorySubscriptionRepository,
    fail_next_listing: AtomicBool,
    stuck: DashSet<Uuid>,
}

impl FlakySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_listing(&self) {
        self.fail_next_listing.store(true, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn fail_writes_to(&self, id: Uuid) {
        self.stuck.insert(id);
    }
}

#[async_trait]
impl SubscriptionRepository for FlakySubscriptions {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_platform_id(
        &self,
        platform: &str,
        platform_subscription_id: &str,
    ) -> DbResult<Option<SubscriptionRow>> {
        self.inner
            .find_by_platform_id(platform, platform_subscription_id)
            .await
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &SubscriptionFilter,
    ) -> DbResult<(Vec<SubscriptionRow>, i64)> {
        if self.fail_next_listing.swap(false, Ordering::SeqCst) {
            return Err(DbError::Corrupt("connection reset during listing".to_string()));
        }
        self.inner.list_by_user(user_id, filter).await
    }

    async fn find_entitled_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SubscriptionRow>> {
        self.inner.find_entitled_by_user(user_id, now).await
    }

    async fn list_cancellation_due(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u32,
    ) -> DbResult<Vec<SubscriptionRow>> {
        self.inner.list_cancellation_due(now, after, limit).await
    }

    async fn create(&self, row: SubscriptionRow) -> DbResult<SubscriptionRow> {
        self.inner.create(row).await
    }

    async fn compare_and_swap(
        &self,
        row: &SubscriptionRow,
        expected_version: i64,
    ) -> DbResult<bool> {
        if self.stuck.contains(&row.id) {
            return Err(DbError::Corrupt("row locked by another writer".to_string()));
        }
        self.inner.compare_and_swap(row, expected_version).await
    }
}
