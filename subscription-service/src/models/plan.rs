//! Purchasable plan.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PLAN_DURATION_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    /// Length of one subscription period, in days.
    pub duration: u32,
    #[serde(default)]
    pub features: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by admins.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub duration: Option<u32>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl UpdatePlan {
    pub fn apply(self, plan: &mut Plan) {
        if let Some(name) = self.name {
            plan.name = name;
        }
        if let Some(description) = self.description {
            plan.description = description;
        }
        if let Some(price) = self.price {
            plan.price = price;
        }
        if let Some(duration) = self.duration {
            plan.duration = duration;
        }
        if let Some(features) = self.features {
            plan.features = features;
        }
        if let Some(is_active) = self.is_active {
            plan.is_active = is_active;
        }
    }
}
