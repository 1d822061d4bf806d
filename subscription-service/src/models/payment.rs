//! Payment model and its status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Paid,
    Failed,
    Declined,
    Expired,
    Cancelled,
}

/// Outcome of feeding a gateway-reported status into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Reported status equals the stored one.
    Unchanged,
    /// Persist the new status; `activate` when it completes the purchase.
    Apply { activate: bool },
    /// The stored status is final for this report.
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Declined => "DECLINED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse a gateway status string, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Some(PaymentStatus::Created),
            "PAID" => Some(PaymentStatus::Paid),
            "FAILED" => Some(PaymentStatus::Failed),
            "DECLINED" => Some(PaymentStatus::Declined),
            "EXPIRED" => Some(PaymentStatus::Expired),
            "CANCELLED" | "CANCELED" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Created)
    }

    /// Transition table.
    ///
    /// CREATED may move anywhere. FAILED and DECLINED may still become PAID,
    /// the hosted page lets the customer retry with another card. PAID,
    /// EXPIRED and CANCELLED are final.
    pub fn transition(self, incoming: PaymentStatus) -> Transition {
        use PaymentStatus::*;

        if self == incoming {
            return Transition::Unchanged;
        }

        match (self, incoming) {
            (Created, Paid) | (Failed, Paid) | (Declined, Paid) => {
                Transition::Apply { activate: true }
            }
            (Created, _) => Transition::Apply { activate: false },
            _ => Transition::Rejected,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing facts recorded when the payment was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub plan_name: String,
    pub original_amount: Decimal,
    pub discount: Decimal,
    pub final_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: String,
    /// Identifier assigned by the gateway.
    pub external_id: String,
    /// Our own order reference, `order_<user>_<millis>_<uuid>`.
    pub order_id: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    pub plan_id: String,
    pub user_id: String,
    pub title: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_url: String,
    pub status: PaymentStatus,
    pub callback_url: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub metadata: PaymentMetadata,
    #[serde(default)]
    pub webhook_received: bool,
    #[serde(default)]
    pub webhook_received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Build an order id unique across users and time.
pub fn generate_order_id(user_id: &str, now: DateTime<Utc>) -> String {
    format!(
        "order_{}_{}_{}",
        user_id,
        now.timestamp_millis(),
        uuid::Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn same_status_is_unchanged() {
        for status in [Created, Paid, Failed, Declined, Expired, Cancelled] {
            assert_eq!(status.transition(status), Transition::Unchanged);
        }
    }

    #[test]
    fn created_moves_anywhere_and_only_paid_activates() {
        assert_eq!(Created.transition(Paid), Transition::Apply { activate: true });
        for next in [Failed, Declined, Expired, Cancelled] {
            assert_eq!(Created.transition(next), Transition::Apply { activate: false });
        }
    }

    #[test]
    fn paid_is_final() {
        for next in [Created, Failed, Declined, Expired, Cancelled] {
            assert_eq!(Paid.transition(next), Transition::Rejected);
        }
    }

    #[test]
    fn failed_and_declined_may_still_be_paid() {
        assert_eq!(Failed.transition(Paid), Transition::Apply { activate: true });
        assert_eq!(Declined.transition(Paid), Transition::Apply { activate: true });
        assert_eq!(Failed.transition(Expired), Transition::Rejected);
        assert_eq!(Expired.transition(Paid), Transition::Rejected);
        assert_eq!(Cancelled.transition(Paid), Transition::Rejected);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(PaymentStatus::parse("paid"), Some(Paid));
        assert_eq!(PaymentStatus::parse(" Declined "), Some(Declined));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }

    #[test]
    fn order_id_embeds_user_and_is_unique() {
        let now = Utc::now();
        let a = generate_order_id("u1", now);
        let b = generate_order_id("u1", now);

        assert!(a.starts_with(&format!("order_u1_{}_", now.timestamp_millis())));
        assert_ne!(a, b);
    }
}
