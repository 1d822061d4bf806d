use crate::dtos::{CallbackStatusResponse, CreatePaymentRequest, PaymentResponse, PaymentStatusResponse};
use crate::middleware::UserContext;
use crate::services::payments::{InitiatePayment, WebhookNotification};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

pub async fn create_payment(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let intent = state
        .payments
        .initiate(InitiatePayment {
            user_id: user.user_id,
            plan_id: payload.plan_id,
            coupon_code: payload.coupon_code,
            callback_url: payload.callback_url,
            webhook_url: payload.webhook_url,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(intent)))
}

/// Reconcile and return one of the caller's payments.
pub async fn payment_status(
    State(state): State<AppState>,
    user: UserContext,
    Path(identifier): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .payments
        .reconcile_for_user(&identifier, &user.user_id)
        .await?;
    Ok(Json(PaymentStatusResponse::from(outcome)))
}

/// Unauthenticated status lookup for the page the gateway redirects to.
pub async fn callback_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.payments.reconcile(&identifier).await?;
    Ok(Json(CallbackStatusResponse::from(outcome)))
}

pub async fn my_payments(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let payments: Vec<PaymentResponse> = state
        .payments
        .list_for_user(&user.user_id)
        .await?
        .into_iter()
        .map(PaymentResponse::from)
        .collect();
    Ok(Json(payments))
}

/// Gateway status notification. 4xx responses tell the sender not to retry,
/// 503 asks it to redeliver.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state.payments.verify_webhook(&body, signature)?;

    let notification: WebhookNotification = serde_json::from_slice(&body).map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {}", e))
    })?;

    let ack = state.payments.handle_webhook(notification).await?;
    Ok(Json(ack))
}
