//! Domain models for subscription-service.

mod coupon;
mod payment;
mod plan;
mod subscription;

pub use coupon::{
    normalize_code, AppliedDiscount, Coupon, CouponRejection, CouponUsage, DiscountType,
};
pub use payment::{
    generate_order_id, Payment, PaymentMetadata, PaymentStatus, Transition,
};
pub use plan::{Plan, UpdatePlan, DEFAULT_PLAN_DURATION_DAYS};
pub use subscription::{Subscription, SubscriptionStatus};

#[cfg(test)]
pub(crate) use coupon::tests::coupon as test_coupon;
