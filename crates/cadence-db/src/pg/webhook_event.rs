//! PostgreSQL webhook idempotency repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::WebhookEventRow;
use crate::repo::WebhookEventRepository;

/// PostgreSQL webhook event repository
#[derive(Clone)]
pub struct PgWebhookEventRepository {
    pool: PgPool,
}

impl PgWebhookEventRepository {
    /// Create a new webhook event repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for PgWebhookEventRepository {
    async fn claim(
        &self,
        platform: &str,
        platform_event_id: &str,
        event_type: &str,
        stale_before: DateTime<Utc>,
    ) -> DbResult<bool> {
        // The conditional update only fires for an unfinished claim older than
        // `stale_before`; otherwise nothing is returned and the claim is lost.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (platform, platform_event_id, event_type, claimed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (platform, platform_event_id) DO UPDATE
                SET claimed_at = NOW()
                WHERE webhook_events.processed_at IS NULL
                  AND webhook_events.claimed_at < $4
            RETURNING platform_event_id
            "#,
        )
        .bind(platform)
        .bind(platform_event_id)
        .bind(event_type)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn complete(
        &self,
        platform: &str,
        platform_event_id: &str,
        outcome: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET outcome = $3, processed_at = NOW()
            WHERE platform = $1 AND platform_event_id = $2
            "#,
        )
        .bind(platform)
        .bind(platform_event_id)
        .bind(outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(&self, platform: &str, platform_event_id: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE platform = $1 AND platform_event_id = $2 AND processed_at IS NULL
            "#,
        )
        .bind(platform)
        .bind(platform_event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        platform: &str,
        platform_event_id: &str,
    ) -> DbResult<Option<WebhookEventRow>> {
        let row = sqlx::query_as::<_, WebhookEventRow>(
            r#"
            SELECT platform, platform_event_id, event_type, outcome, claimed_at, processed_at
            FROM webhook_events
            WHERE platform = $1 AND platform_event_id = $2
            "#,
        )
        .bind(platform)
        .bind(platform_event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
