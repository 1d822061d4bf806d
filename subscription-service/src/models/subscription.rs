//! Subscription model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

/// A time-bounded grant of a plan to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// New active subscription covering `duration_days` from `now`.
    pub fn starting_at(
        id: String,
        user_id: &str,
        plan_id: &str,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            plan_id: plan_id.to_string(),
            start_date: now,
            end_date: now + Duration::days(i64::from(duration_days)),
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_date_is_start_plus_duration() {
        let now = Utc::now();
        let sub = Subscription::starting_at("s1".into(), "u1", "p1", 30, now);

        assert_eq!(sub.start_date, now);
        assert_eq!(sub.end_date - sub.start_date, Duration::days(30));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(!sub.is_lapsed(now));
        assert!(sub.is_lapsed(now + Duration::days(31)));
    }
}
