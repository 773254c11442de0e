//! PostgreSQL usage repository implementation

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::UsageRow;
use crate::repo::{UsageIncrement, UsageRepository};

const USAGE_COLUMNS: &str = "id, user_id, period_start, period_end, analyses_used, \
     storage_used_gb, chat_messages_used, created_at, updated_at";

/// PostgreSQL usage repository
#[derive(Clone)]
pub struct PgUsageRepository {
    pool: PgPool,
}

impl PgUsageRepository {
    /// Create a new usage repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> DbResult<UsageRow> {
        sqlx::query(
            r#"
            INSERT INTO usage_periods (id, user_id, period_start, period_end)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, period_start, period_end) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM usage_periods \
             WHERE user_id = $1 AND period_start = $2 AND period_end = $3"
        );
        let row = sqlx::query_as::<_, UsageRow>(&sql)
            .bind(user_id)
            .bind(period_start)
            .bind(period_end)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    async fn increment(
        &self,
        user_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
        delta: &UsageIncrement,
    ) -> DbResult<UsageRow> {
        // Single statement so concurrent increments never lose an update.
        let sql = format!(
            r#"
            INSERT INTO usage_periods (id, user_id, period_start, period_end,
                                       analyses_used, storage_used_gb, chat_messages_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, period_start, period_end) DO UPDATE SET
                analyses_used = usage_periods.analyses_used + EXCLUDED.analyses_used,
                storage_used_gb = usage_periods.storage_used_gb + EXCLUDED.storage_used_gb,
                chat_messages_used = usage_periods.chat_messages_used + EXCLUDED.chat_messages_used,
                updated_at = NOW()
            RETURNING {USAGE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UsageRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(period_start)
            .bind(period_end)
            .bind(delta.analyses)
            .bind(delta.storage_gb)
            .bind(delta.chat_messages)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }
}
