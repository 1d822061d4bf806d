use crate::models::Subscription;
use crate::services::subscriptions::CurrentSubscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `subscribe` and `renew`.
#[derive(Debug, Deserialize, Validate)]
pub struct PlanSelectionRequest {
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignSubscriptionRequest {
    #[validate(length(min = 1, message = "User is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub delete_permanently: bool,
}

#[derive(Debug, Serialize)]
pub struct MySubscriptionResponse {
    pub has_subscription: bool,
    pub subscription: Option<Subscription>,
    pub is_expired: bool,
}

impl From<CurrentSubscription> for MySubscriptionResponse {
    fn from(current: CurrentSubscription) -> Self {
        Self {
            has_subscription: current.subscription.is_some() && !current.is_expired,
            subscription: current.subscription,
            is_expired: current.is_expired,
        }
    }
}
