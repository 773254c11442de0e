//! PostgreSQL payment repository implementation

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbResult;
use crate::models::PaymentRow;
use crate::repo::{CreatePayment, PaymentRepository};

/// PostgreSQL payment repository
#[derive(Clone)]
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    /// Create a new payment repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_if_absent(&self, payment: CreatePayment) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (id, subscription_id, amount, currency, status, platform,
                                  platform_payment_id, payment_method, paid_at, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (platform, platform_payment_id) DO NOTHING
            "#,
        )
        .bind(payment.id)
        .bind(payment.subscription_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.status)
        .bind(&payment.platform)
        .bind(&payment.platform_payment_id)
        .bind(&payment.payment_method)
        .bind(payment.paid_at)
        .bind(payment.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_subscription(&self, subscription_id: Uuid) -> DbResult<Vec<PaymentRow>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, subscription_id, amount, currency, status, platform, platform_payment_id,
                   payment_method, paid_at, failed_at, refunded_at, created_at
            FROM payments
            WHERE subscription_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
