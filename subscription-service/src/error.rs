//! Mapping of domain errors onto HTTP errors.

use crate::models::CouponRejection;
use crate::services::gateway::GatewayError;
use crate::services::{CouponError, PaymentError, StoreError, SubscriptionError};
use service_core::error::AppError;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => AppError::Conflict(anyhow::anyhow!("Duplicate {}", what)),
            StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

impl From<CouponRejection> for AppError {
    fn from(rejection: CouponRejection) -> Self {
        match rejection {
            CouponRejection::NotFound => AppError::NotFound(anyhow::anyhow!(rejection)),
            _ => AppError::BadRequest(anyhow::anyhow!(rejection)),
        }
    }
}

impl From<CouponError> for AppError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::Rejected(rejection) => rejection.into(),
            CouponError::Store(e) => e.into(),
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::PlanNotFound | SubscriptionError::NotFound => {
                AppError::NotFound(anyhow::anyhow!(err))
            }
            SubscriptionError::InvalidPeriod => AppError::BadRequest(anyhow::anyhow!(err)),
            SubscriptionError::Store(e) => e.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured => AppError::InternalError(anyhow::anyhow!(err)),
            GatewayError::Timeout(_) => AppError::GatewayTimeout(err.to_string()),
            GatewayError::Unreachable(_) => AppError::ServiceUnavailable(err.to_string()),
            GatewayError::Rejected { .. } | GatewayError::InvalidResponse(_) => {
                AppError::BadGateway(err.to_string())
            }
        }
    }
}

/// Storage and activation failures inside the payment flow are reported as
/// transient so the gateway redelivers the webhook.
impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::PlanNotFound | PaymentError::NotFound => {
                AppError::NotFound(anyhow::anyhow!(err))
            }
            PaymentError::MissingField(_) | PaymentError::UnknownStatus(_) => {
                AppError::BadRequest(anyhow::anyhow!(err))
            }
            PaymentError::InvalidSignature => AppError::Unauthorized(anyhow::anyhow!(err)),
            PaymentError::Contended => AppError::ServiceUnavailable(err.to_string()),
            PaymentError::Gateway(e) => e.into(),
            PaymentError::Activation(SubscriptionError::Store(StoreError::Backend(e)))
            | PaymentError::Store(StoreError::Backend(e)) => {
                tracing::error!(error = %e, "Payment storage failure");
                AppError::ServiceUnavailable("Storage temporarily unavailable".to_string())
            }
            PaymentError::Activation(e) => e.into(),
            PaymentError::Store(e) => e.into(),
        }
    }
}
