//! PostgreSQL plan repository implementation

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::PlanRow;
use crate::repo::{CreatePlan, PlanRepository};

const PLAN_COLUMNS: &str = "id, name, description, features, monthly_price, yearly_price, \
     card_monthly_product_id, card_yearly_product_id, apple_monthly_product_id, \
     apple_yearly_product_id, google_monthly_product_id, google_yearly_product_id, \
     max_analyses_per_month, max_storage_gb, chat_enabled, priority_support, sort_order, \
     active, created_at, updated_at";

/// PostgreSQL plan repository
#[derive(Clone)]
pub struct PgPlanRepository {
    pool: PgPool,
}

impl PgPlanRepository {
    /// Create a new plan repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for PgPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PlanRow>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1");
        let plan = sqlx::query_as::<_, PlanRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(plan)
    }

    async fn list_active(&self) -> DbResult<Vec<PlanRow>> {
        let sql = format!(
            "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE active ORDER BY sort_order ASC, created_at ASC"
        );
        let plans = sqlx::query_as::<_, PlanRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(plans)
    }

    async fn create(&self, plan: CreatePlan) -> DbResult<PlanRow> {
        let sql = format!(
            r#"
            INSERT INTO subscription_plans (id, name, description, features, monthly_price,
                yearly_price, card_monthly_product_id, card_yearly_product_id,
                apple_monthly_product_id, apple_yearly_product_id, google_monthly_product_id,
                google_yearly_product_id, max_analyses_per_month, max_storage_gb, chat_enabled,
                priority_support, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {PLAN_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PlanRow>(&sql)
            .bind(plan.id)
            .bind(&plan.name)
            .bind(&plan.description)
            .bind(&plan.features)
            .bind(plan.monthly_price)
            .bind(plan.yearly_price)
            .bind(&plan.card_monthly_product_id)
            .bind(&plan.card_yearly_product_id)
            .bind(&plan.apple_monthly_product_id)
            .bind(&plan.apple_yearly_product_id)
            .bind(&plan.google_monthly_product_id)
            .bind(&plan.google_yearly_product_id)
            .bind(plan.max_analyses_per_month)
            .bind(plan.max_storage_gb)
            .bind(plan.chat_enabled)
            .bind(plan.priority_support)
            .bind(plan.sort_order)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbError::from_insert(e, "plan"))?;

        Ok(row)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE subscription_plans SET active = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(active)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
