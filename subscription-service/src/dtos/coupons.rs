use crate::models::{normalize_code, Coupon, CouponUsage, DiscountType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, message = "Coupon code is required"))]
    pub code: String,
    pub amount: Decimal,
}

impl ValidateCouponRequest {
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;
        if self.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Amount must be greater than zero"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code must be 1-64 characters"))]
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub minimum_amount: Option<Decimal>,
    #[serde(default)]
    pub maximum_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[validate(range(min = 1, message = "Usage limit must be at least 1"))]
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateCouponRequest {
    pub fn into_coupon(self, now: DateTime<Utc>) -> Result<Coupon, AppError> {
        self.validate()?;
        let code = normalize_code(&self.code);
        if code.is_empty() {
            return Err(bad_request("Coupon code is required"));
        }

        let coupon = Coupon {
            id: Uuid::new_v4().to_string(),
            code,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            minimum_amount: self.minimum_amount.unwrap_or(Decimal::ZERO),
            maximum_discount: self.maximum_discount,
            start_date: self.start_date,
            end_date: self.end_date,
            usage_limit: self.usage_limit,
            used_count: 0,
            used_by: Vec::<CouponUsage>::new(),
            is_active: self.is_active.unwrap_or(true),
            description: self.description.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        check_terms(&coupon)?;
        Ok(coupon)
    }
}

/// Partial update. Usage counters are not editable. `maximum_discount` and
/// `usage_limit` accept an explicit `null` to remove the cap.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    #[validate(length(min = 1, max = 64, message = "Coupon code must be 1-64 characters"))]
    pub code: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Decimal>,
    pub minimum_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub maximum_discount: Option<Option<Decimal>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit: Option<Option<u32>>,
    pub is_active: Option<bool>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl UpdateCouponRequest {
    pub fn apply(self, coupon: &mut Coupon, now: DateTime<Utc>) -> Result<(), AppError> {
        self.validate()?;
        if let Some(code) = self.code {
            coupon.code = normalize_code(&code);
        }
        if let Some(discount_type) = self.discount_type {
            coupon.discount_type = discount_type;
        }
        if let Some(value) = self.discount_value {
            coupon.discount_value = value;
        }
        if let Some(minimum) = self.minimum_amount {
            coupon.minimum_amount = minimum;
        }
        if let Some(cap) = self.maximum_discount {
            coupon.maximum_discount = cap;
        }
        if let Some(start) = self.start_date {
            coupon.start_date = start;
        }
        if let Some(end) = self.end_date {
            coupon.end_date = end;
        }
        if let Some(limit) = self.usage_limit {
            coupon.usage_limit = limit;
        }
        if let Some(is_active) = self.is_active {
            coupon.is_active = is_active;
        }
        if let Some(description) = self.description {
            coupon.description = description;
        }
        coupon.updated_at = now;
        check_terms(coupon)
    }
}

fn check_terms(coupon: &Coupon) -> Result<(), AppError> {
    if coupon.code.is_empty() {
        return Err(bad_request("Coupon code is required"));
    }
    if coupon.discount_value <= Decimal::ZERO {
        return Err(bad_request("Discount value must be greater than zero"));
    }
    if coupon.discount_type == DiscountType::Percentage
        && coupon.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(bad_request("Percentage discount cannot exceed 100"));
    }
    if coupon.minimum_amount < Decimal::ZERO {
        return Err(bad_request("Minimum amount cannot be negative"));
    }
    if matches!(coupon.maximum_discount, Some(cap) if cap < Decimal::ZERO) {
        return Err(bad_request("Maximum discount cannot be negative"));
    }
    if coupon.start_date >= coupon.end_date {
        return Err(bad_request("Start date must be before end date"));
    }
    match coupon.usage_limit {
        Some(0) => return Err(bad_request("Usage limit must be at least 1")),
        Some(limit) if coupon.used_count > limit => {
            return Err(bad_request("Usage limit cannot be below the current usage count"));
        }
        _ => {}
    }
    Ok(())
}

/// Absent field → `None`, explicit `null` → `Some(None)`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn bad_request(message: &'static str) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(message))
}

/// Admin view of a coupon. `used_by` is summarised to a count.
#[derive(Debug, Serialize)]
pub struct CouponResponse {
    pub id: String,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub minimum_amount: Decimal,
    pub maximum_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub usage_limit: Option<u32>,
    pub used_count: u32,
    pub is_active: bool,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Coupon> for CouponResponse {
    fn from(c: Coupon) -> Self {
        Self {
            id: c.id,
            code: c.code,
            discount_type: c.discount_type,
            discount_value: c.discount_value,
            minimum_amount: c.minimum_amount,
            maximum_discount: c.maximum_discount,
            start_date: c.start_date,
            end_date: c.end_date,
            usage_limit: c.usage_limit,
            used_count: c.used_count,
            is_active: c.is_active,
            description: c.description,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request() -> CreateCouponRequest {
        let now = Utc::now();
        CreateCouponRequest {
            code: " summer ".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::from(20),
            minimum_amount: None,
            maximum_discount: None,
            start_date: now,
            end_date: now + Duration::days(7),
            usage_limit: None,
            is_active: None,
            description: None,
        }
    }

    #[test]
    fn create_normalizes_code_and_defaults() {
        let coupon = request().into_coupon(Utc::now()).unwrap();

        assert_eq!(coupon.code, "SUMMER");
        assert!(coupon.is_active);
        assert_eq!(coupon.minimum_amount, Decimal::ZERO);
        assert_eq!(coupon.used_count, 0);
    }

    #[test]
    fn percentage_above_hundred_is_rejected() {
        let mut req = request();
        req.discount_value = Decimal::from(150);
        assert!(matches!(
            req.into_coupon(Utc::now()),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn window_must_be_ordered() {
        let mut req = request();
        req.end_date = req.start_date;
        assert!(req.into_coupon(Utc::now()).is_err());
    }

    #[test]
    fn update_keeps_terms_consistent() {
        let mut coupon = request().into_coupon(Utc::now()).unwrap();
        let update = UpdateCouponRequest {
            discount_value: Some(Decimal::ZERO),
            ..UpdateCouponRequest::default()
        };

        assert!(update.apply(&mut coupon, Utc::now()).is_err());
    }

    #[test]
    fn usage_limit_cannot_drop_below_usage() {
        let mut coupon = request().into_coupon(Utc::now()).unwrap();
        coupon.used_count = 5;

        let update = UpdateCouponRequest {
            usage_limit: Some(Some(2)),
            ..UpdateCouponRequest::default()
        };
        assert!(matches!(
            update.apply(&mut coupon, Utc::now()),
            Err(AppError::BadRequest(_))
        ));

        let update = UpdateCouponRequest {
            usage_limit: Some(Some(5)),
            ..UpdateCouponRequest::default()
        };
        assert!(update.apply(&mut coupon, Utc::now()).is_ok());
        assert_eq!(coupon.usage_limit, Some(5));
    }

    #[test]
    fn null_clears_caps_and_absent_keeps_them() {
        let mut coupon = request().into_coupon(Utc::now()).unwrap();
        coupon.usage_limit = Some(10);
        coupon.maximum_discount = Some(Decimal::from(50));

        let keep: UpdateCouponRequest =
            serde_json::from_str(r#"{"description": "spring sale"}"#).unwrap();
        keep.apply(&mut coupon, Utc::now()).unwrap();
        assert_eq!(coupon.usage_limit, Some(10));
        assert_eq!(coupon.maximum_discount, Some(Decimal::from(50)));

        let clear: UpdateCouponRequest =
            serde_json::from_str(r#"{"usage_limit": null, "maximum_discount": null}"#).unwrap();
        clear.apply(&mut coupon, Utc::now()).unwrap();
        assert_eq!(coupon.usage_limit, None);
        assert_eq!(coupon.maximum_discount, None);
    }

    #[test]
    fn zero_usage_limit_is_rejected_on_update() {
        let mut coupon = request().into_coupon(Utc::now()).unwrap();
        let update: UpdateCouponRequest = serde_json::from_str(r#"{"usage_limit": 0}"#).unwrap();
        assert!(update.apply(&mut coupon, Utc::now()).is_err());
    }
}
