//! Coupon model and the discount rules that apply to it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a coupon reduces the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

/// One redemption of a coupon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub user_id: String,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub minimum_amount: Decimal,
    #[serde(default)]
    pub maximum_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
    #[serde(default)]
    pub used_by: Vec<CouponUsage>,
    pub is_active: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why a coupon cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("Coupon code not found")]
    NotFound,
    #[error("Coupon is not active")]
    NotActive,
    #[error("Coupon has not started yet")]
    NotStarted,
    #[error("Coupon has expired")]
    Expired,
    #[error("Coupon usage limit reached")]
    LimitReached,
    #[error("You have already used this coupon")]
    AlreadyUsed,
    #[error("Order amount is below the coupon minimum")]
    BelowMinimum,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "not_found",
            CouponRejection::NotActive => "not_active",
            CouponRejection::NotStarted => "not_started",
            CouponRejection::Expired => "expired",
            CouponRejection::LimitReached => "limit_reached",
            CouponRejection::AlreadyUsed => "already_used",
            CouponRejection::BelowMinimum => "below_minimum",
        }
    }
}

/// Result of applying a coupon to an amount.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDiscount {
    pub discount: Decimal,
    pub final_amount: Decimal,
}

/// Trim and uppercase a user-entered code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl Coupon {
    /// Check every redemption rule against `amount` for `user_id` at `now`.
    ///
    /// Pure: never touches `used_count` or `used_by`.
    pub fn evaluate(
        &self,
        amount: Decimal,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AppliedDiscount, CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::NotActive);
        }
        if now < self.start_date {
            return Err(CouponRejection::NotStarted);
        }
        if now > self.end_date {
            return Err(CouponRejection::Expired);
        }
        if self.is_exhausted() {
            return Err(CouponRejection::LimitReached);
        }
        if self.used_by_user(user_id) {
            return Err(CouponRejection::AlreadyUsed);
        }
        if amount < self.minimum_amount {
            return Err(CouponRejection::BelowMinimum);
        }

        let discount = self.discount_for(amount);
        Ok(AppliedDiscount {
            discount,
            final_amount: (amount - discount).max(Decimal::ZERO),
        })
    }

    /// Discount for `amount`. Fixed discounts are not capped by the amount;
    /// the final amount floors at zero instead.
    pub fn discount_for(&self, amount: Decimal) -> Decimal {
        match self.discount_type {
            DiscountType::Percentage => {
                // Divide first only when the product would overflow.
                let discount = amount
                    .checked_mul(self.discount_value)
                    .map(|product| product / Decimal::ONE_HUNDRED)
                    .or_else(|| (amount / Decimal::ONE_HUNDRED).checked_mul(self.discount_value))
                    .unwrap_or(amount);
                match self.maximum_discount {
                    Some(cap) if discount > cap => cap,
                    _ => discount,
                }
            }
            DiscountType::Fixed => self.discount_value,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if self.used_count >= limit)
    }

    pub fn used_by_user(&self, user_id: &str) -> bool {
        self.used_by.iter().any(|usage| usage.user_id == user_id)
    }
}
