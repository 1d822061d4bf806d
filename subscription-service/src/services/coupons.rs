use crate::models::{normalize_code, Coupon, CouponRejection, DiscountType};
use crate::services::metrics::record_coupon_evaluation;
use crate::services::repository::{CouponRepository, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CouponError {
    #[error(transparent)]
    Rejected(#[from] CouponRejection),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A coupon that applies to an amount, and what it takes off.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponQuote {
    pub coupon_id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub original_amount: Decimal,
    pub discount: Decimal,
    pub final_amount: Decimal,
}

impl CouponQuote {
    fn new(coupon: &Coupon, amount: Decimal, discount: Decimal, final_amount: Decimal) -> Self {
        Self {
            coupon_id: coupon.id.clone(),
            code: coupon.code.clone(),
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
            original_amount: amount,
            discount,
            final_amount,
        }
    }
}

#[derive(Clone)]
pub struct CouponEvaluator {
    coupons: Arc<dyn CouponRepository>,
}

impl CouponEvaluator {
    pub fn new(coupons: Arc<dyn CouponRepository>) -> Self {
        Self { coupons }
    }

    /// Look up `code` and check it against `amount` for `user_id`. Read only.
    #[tracing::instrument(skip(self))]
    pub async fn evaluate(
        &self,
        code: &str,
        amount: Decimal,
        user_id: &str,
    ) -> Result<CouponQuote, CouponError> {
        self.evaluate_at(code, amount, user_id, Utc::now()).await
    }

    pub async fn evaluate_at(
        &self,
        code: &str,
        amount: Decimal,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, CouponError> {
        let code = normalize_code(code);
        let outcome = match self.coupons.find_coupon_by_code(&code).await? {
            None => Err(CouponRejection::NotFound),
            Some(coupon) => coupon
                .evaluate(amount, user_id, now)
                .map(|applied| {
                    CouponQuote::new(&coupon, amount, applied.discount, applied.final_amount)
                }),
        };

        match outcome {
            Ok(quote) => {
                record_coupon_evaluation("applied");
                tracing::debug!(code = %quote.code, discount = %quote.discount, "Coupon applies");
                Ok(quote)
            }
            Err(rejection) => {
                record_coupon_evaluation(rejection.code());
                tracing::debug!(code = %code, reason = rejection.code(), "Coupon rejected");
                Err(rejection.into())
            }
        }
    }

    /// Record the redemption for `user_id`. Fails with `LimitReached` or
    /// `AlreadyUsed` when another purchase got there first.
    pub async fn redeem(&self, quote: &CouponQuote, user_id: &str) -> Result<(), CouponError> {
        if self
            .coupons
            .reserve_usage(&quote.coupon_id, user_id, Utc::now())
            .await?
        {
            return Ok(());
        }

        // Lost the race; report which guard tripped.
        let rejection = match self.coupons.get_coupon(&quote.coupon_id).await? {
            Some(coupon) if coupon.used_by_user(user_id) => CouponRejection::AlreadyUsed,
            Some(_) => CouponRejection::LimitReached,
            None => CouponRejection::NotFound,
        };
        Err(rejection.into())
    }

    /// Undo [`CouponEvaluator::redeem`] after the purchase fell through.
    pub async fn release(&self, quote: &CouponQuote, user_id: &str) {
        if let Err(e) = self.coupons.release_usage(&quote.coupon_id, user_id).await {
            tracing::error!(
                coupon_id = %quote.coupon_id,
                user_id,
                error = %e,
                "Failed to release coupon usage"
            );
        }
    }
}
