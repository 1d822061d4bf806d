use crate::models::{Payment, PaymentMetadata, PaymentStatus};
use crate::services::payments::ReconcileOutcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan_id: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[validate(url(message = "Invalid callback URL"))]
    #[serde(default)]
    pub callback_url: Option<String>,
    #[validate(url(message = "Invalid webhook URL"))]
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub external_id: String,
    pub order_id: String,
    pub subscription_id: Option<String>,
    pub plan_id: String,
    pub title: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_url: String,
    pub status: PaymentStatus,
    pub metadata: PaymentMetadata,
    pub webhook_received: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            external_id: p.external_id,
            order_id: p.order_id,
            subscription_id: p.subscription_id,
            plan_id: p.plan_id,
            title: p.title,
            total_amount: p.total_amount,
            currency: p.currency,
            payment_url: p.payment_url,
            status: p.status,
            metadata: p.metadata,
            webhook_received: p.webhook_received,
            paid_at: p.paid_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment: PaymentResponse,
    /// The gateway could not be reached; `payment` is the last stored state.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<ReconcileOutcome> for PaymentStatusResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        Self {
            payment: outcome.payment.into(),
            stale: outcome.stale,
            note: outcome.note,
        }
    }
}

/// What the post-checkout return page needs, without owner details.
#[derive(Debug, Serialize)]
pub struct CallbackStatusResponse {
    pub id: String,
    pub external_id: String,
    pub order_id: String,
    pub status: PaymentStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub plan_id: String,
    pub subscription_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<ReconcileOutcome> for CallbackStatusResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        let p = outcome.payment;
        Self {
            id: p.id,
            external_id: p.external_id,
            order_id: p.order_id,
            status: p.status,
            total_amount: p.total_amount,
            currency: p.currency,
            plan_id: p.plan_id,
            subscription_id: p.subscription_id,
            paid_at: p.paid_at,
            stale: outcome.stale,
            note: outcome.note,
        }
    }
}
