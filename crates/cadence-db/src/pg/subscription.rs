//! PostgreSQL subscription repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::SubscriptionRow;
use crate::repo::{SubscriptionFilter, SubscriptionRepository};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, billing_cycle, platform, \
     platform_subscription_id, platform_customer_id, amount, currency, current_period_start, \
     current_period_end, trial_start, trial_end, cancel_at, canceled_at, cancel_reason, \
     last_payment_at, next_payment_at, last_event_at, version, created_at, updated_at";

/// PostgreSQL subscription repository
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    /// Create a new subscription repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<SubscriptionRow>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1");
        let sub = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sub)
    }

    async fn find_by_platform_id(
        &self,
        platform: &str,
        platform_subscription_id: &str,
    ) -> DbResult<Option<SubscriptionRow>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE platform = $1 AND platform_subscription_id = $2"
        );
        let sub = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(platform)
            .bind(platform_subscription_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sub)
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        filter: &SubscriptionFilter,
    ) -> DbResult<(Vec<SubscriptionRow>, i64)> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR platform = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id)
            .bind(&filter.status)
            .bind(&filter.platform)
            .bind(i64::from(filter.limit))
            .bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM subscriptions
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR platform = $3)
            "#,
        )
        .bind(user_id)
        .bind(&filter.status)
        .bind(&filter.platform)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    async fn find_entitled_by_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Option<SubscriptionRow>> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
              AND status IN ('ACTIVE', 'TRIALING')
              AND current_period_end > $2
              AND (cancel_at IS NULL OR cancel_at > $2)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let sub = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sub)
    }

    async fn list_cancellation_due(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u32,
    ) -> DbResult<Vec<SubscriptionRow>> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE cancel_at IS NOT NULL
              AND cancel_at <= $1
              AND status NOT IN ('CANCELED', 'EXPIRED')
              AND ($2::timestamptz IS NULL OR (cancel_at, id) > ($2, $3::uuid))
            ORDER BY cancel_at ASC, id ASC
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(now)
            .bind(after.map(|(at, _)| at))
            .bind(after.map(|(_, id)| id))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn create(&self, row: SubscriptionRow) -> DbResult<SubscriptionRow> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, billing_cycle, platform,
                platform_subscription_id, platform_customer_id, amount, currency,
                current_period_start, current_period_end, trial_start, trial_end, cancel_at,
                canceled_at, cancel_reason, last_payment_at, next_payment_at, last_event_at,
                version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(row.id)
            .bind(row.user_id)
            .bind(row.plan_id)
            .bind(&row.status)
            .bind(&row.billing_cycle)
            .bind(&row.platform)
            .bind(&row.platform_subscription_id)
            .bind(&row.platform_customer_id)
            .bind(row.amount)
            .bind(&row.currency)
            .bind(row.current_period_start)
            .bind(row.current_period_end)
            .bind(row.trial_start)
            .bind(row.trial_end)
            .bind(row.cancel_at)
            .bind(row.canceled_at)
            .bind(&row.cancel_reason)
            .bind(row.last_payment_at)
            .bind(row.next_payment_at)
            .bind(row.last_event_at)
            .bind(row.version)
            .bind(row.created_at)
            .bind(row.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::from_insert(e, "subscription"))?;

        Ok(created)
    }

    async fn compare_and_swap(
        &self,
        row: &SubscriptionRow,
        expected_version: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $3, platform_subscription_id = $4, platform_customer_id = $5,
                current_period_start = $6, current_period_end = $7, trial_start = $8,
                trial_end = $9, cancel_at = $10, canceled_at = $11, cancel_reason = $12,
                last_payment_at = $13, next_payment_at = $14, last_event_at = $15,
                updated_at = $16, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(row.id)
        .bind(expected_version)
        .bind(&row.status)
        .bind(&row.platform_subscription_id)
        .bind(&row.platform_customer_id)
        .bind(row.current_period_start)
        .bind(row.current_period_end)
        .bind(row.trial_start)
        .bind(row.trial_end)
        .bind(row.cancel_at)
        .bind(row.canceled_at)
        .bind(&row.cancel_reason)
        .bind(row.last_payment_at)
        .bind(row.next_payment_at)
        .bind(row.last_event_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "platform subscription id"))?;

        Ok(result.rows_affected() == 1)
    }
}
