//! Plan catalog handlers

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use cadence_types::{NewPlan, Plan, PlanId};

use super::shared::{parse_id, require_admin, timed};
use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/v1/subscriptions/plans
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    timed("list_plans", async {
        Ok(Json(state.billing.list_active_plans().await?))
    })
    .await
}

/// GET /api/v1/subscriptions/plans/{id}
pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Plan>> {
    timed("get_plan", async {
        let id: PlanId = parse_id(&id, "plan id")?;
        Ok(Json(state.billing.get_plan(id).await?))
    })
    .await
}

/// POST /api/v1/subscriptions/admin/plans
pub async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    timed("create_plan", async {
        require_admin(&state, &headers)?;
        let plan = state.billing.create_plan(req).await?;
        tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");
        Ok((StatusCode::CREATED, Json(plan)))
    })
    .await
}

/// POST /api/v1/subscriptions/admin/plans/{id}/retire
pub async fn retire_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Plan>> {
    timed("retire_plan", async {
        require_admin(&state, &headers)?;
        let id: PlanId = parse_id(&id, "plan id")?;
        let plan = state.billing.retire_plan(id).await?;
        tracing::info!(plan_id = %plan.id, "Plan retired");
        Ok(Json(plan))
    })
    .await
}
