use crate::dtos::{CreatePlanRequest, UpdatePlanRequest};
use crate::middleware::AdminContext;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

/// Active plans, cheapest first.
pub async fn list_plans(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.repos.plans.list_plans(true).await?))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let plan = state
        .repos
        .plans
        .get_plan(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;
    Ok(Json(plan))
}

pub async fn create_plan(
    State(state): State<AppState>,
    _admin: AdminContext,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let plan = payload.into_plan(Utc::now())?;
    state.repos.plans.insert_plan(&plan).await?;

    tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = payload.into_update()?;
    let mut plan = state
        .repos
        .plans
        .get_plan(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

    update.apply(&mut plan);
    if !state.repos.plans.replace_plan(&plan).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Plan not found")));
    }
    Ok(Json(plan))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.repos.plans.delete_plan(&id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Plan not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
