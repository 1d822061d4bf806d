use crate::models::{Plan, UpdatePlan, DEFAULT_PLAN_DURATION_DAYS};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 120, message = "Plan name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    #[validate(range(min = 1, message = "Duration must be at least 1 day"))]
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_duration() -> u32 {
    DEFAULT_PLAN_DURATION_DAYS
}

fn default_active() -> bool {
    true
}

impl CreatePlanRequest {
    pub fn into_plan(self, now: DateTime<Utc>) -> Result<Plan, AppError> {
        self.validate()?;
        check_price(self.price)?;
        Ok(Plan {
            id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            description: self.description,
            price: self.price,
            duration: self.duration,
            features: self.features,
            is_active: self.is_active,
            created_at: now,
        })
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 120, message = "Plan name is required"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    #[validate(range(min = 1, message = "Duration must be at least 1 day"))]
    pub duration: Option<u32>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl UpdatePlanRequest {
    pub fn into_update(self) -> Result<UpdatePlan, AppError> {
        self.validate()?;
        if let Some(price) = self.price {
            check_price(price)?;
        }
        Ok(UpdatePlan {
            name: self.name.map(|n| n.trim().to_string()),
            description: self.description,
            price: self.price,
            duration: self.duration,
            features: self.features,
            is_active: self.is_active,
        })
    }
}

fn check_price(price: Decimal) -> Result<(), AppError> {
    if price < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Price cannot be negative"
        )));
    }
    Ok(())
}
