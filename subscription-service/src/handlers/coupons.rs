use crate::dtos::{CouponResponse, CreateCouponRequest, UpdateCouponRequest, ValidateCouponRequest};
use crate::middleware::{AdminContext, UserContext};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

/// Check a code against an amount for the caller without redeeming it.
pub async fn validate_coupon(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;

    let quote = state
        .coupons
        .evaluate(&payload.code, payload.amount, &user.user_id)
        .await?;

    Ok(Json(json!({ "valid": true, "coupon": quote })))
}

pub async fn list_coupons(
    State(state): State<AppState>,
    _admin: AdminContext,
) -> Result<impl IntoResponse, AppError> {
    let coupons: Vec<CouponResponse> = state
        .repos
        .coupons
        .list_coupons()
        .await?
        .into_iter()
        .map(CouponResponse::from)
        .collect();
    Ok(Json(coupons))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = state
        .repos
        .coupons
        .get_coupon(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Coupon not found")))?;
    Ok(Json(CouponResponse::from(coupon)))
}

pub async fn create_coupon(
    State(state): State<AppState>,
    admin: AdminContext,
    Json(payload): Json<CreateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    let coupon = payload.into_coupon(Utc::now())?;

    if state
        .repos
        .coupons
        .find_coupon_by_code(&coupon.code)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Coupon code already exists"
        )));
    }
    state.repos.coupons.insert_coupon(&coupon).await?;

    tracing::info!(
        coupon_id = %coupon.id,
        code = %coupon.code,
        admin_id = %admin.0.user_id,
        "Coupon created"
    );
    Ok((StatusCode::CREATED, Json(CouponResponse::from(coupon))))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
    Json(payload): Json<UpdateCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut coupon = state
        .repos
        .coupons
        .get_coupon(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Coupon not found")))?;

    payload.apply(&mut coupon, Utc::now())?;

    if let Some(existing) = state.repos.coupons.find_coupon_by_code(&coupon.code).await? {
        if existing.id != coupon.id {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Coupon code already exists"
            )));
        }
    }

    if !state.repos.coupons.replace_coupon(&coupon).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Coupon not found")));
    }
    Ok(Json(CouponResponse::from(coupon)))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.repos.coupons.delete_coupon(&id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!("Coupon not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
