use crate::dtos::{
    AssignSubscriptionRequest, DeleteParams, MySubscriptionResponse, PlanSelectionRequest,
    UpdateSubscriptionRequest,
};
use crate::middleware::{AdminContext, UserContext};
use crate::services::subscriptions::ActivationReason;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

pub async fn my_subscription(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let current = state.subscriptions.current(&user.user_id).await?;
    Ok(Json(MySubscriptionResponse::from(current)))
}

pub async fn my_subscriptions(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.subscriptions.list_for_user(&user.user_id).await?))
}

/// Start a subscription directly, replacing any active one.
pub async fn subscribe(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<PlanSelectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let plan = state.subscriptions.plan(&payload.plan_id, true).await?;
    let subscription = state
        .subscriptions
        .activate(&user.user_id, &plan, ActivationReason::Subscribe)
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn renew(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<PlanSelectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let plan = state.subscriptions.plan(&payload.plan_id, true).await?;
    let subscription = state.subscriptions.renew(&user.user_id, &plan).await?;

    Ok(Json(subscription))
}

pub async fn assign(
    State(state): State<AppState>,
    admin: AdminContext,
    Json(payload): Json<AssignSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let plan = state.subscriptions.plan(&payload.plan_id, false).await?;
    let subscription = state
        .subscriptions
        .activate(&payload.user_id, &plan, ActivationReason::Assign)
        .await?;

    tracing::info!(
        user_id = %payload.user_id,
        plan_id = %plan.id,
        admin_id = %admin.0.user_id,
        "Subscription assigned"
    );
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn user_subscriptions(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.subscriptions.list_for_user(&user_id).await?))
}

/// Cancel the user's active subscriptions, or delete all of them with
/// `?delete_permanently=true`.
pub async fn remove_user_subscriptions(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(user_id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, AppError> {
    if params.delete_permanently {
        let deleted = state.subscriptions.delete_for_user(&user_id).await?;
        Ok(Json(json!({ "deleted": deleted })))
    } else {
        let cancelled = state.subscriptions.cancel_for_user(&user_id).await?;
        Ok(Json(json!({ "cancelled": cancelled })))
    }
}

pub async fn update_subscription(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
    Json(payload): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state
        .subscriptions
        .update_period(&id, payload.start_date, payload.end_date)
        .await?;
    Ok(Json(subscription))
}

pub async fn remove_subscription(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, AppError> {
    if params.delete_permanently {
        state.subscriptions.delete(&id).await?;
    } else {
        state.subscriptions.cancel(&id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
