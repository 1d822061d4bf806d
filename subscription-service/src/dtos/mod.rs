//! Request and response bodies.

pub mod coupons;
pub mod payments;
pub mod plans;
pub mod subscriptions;

pub use coupons::{CouponResponse, CreateCouponRequest, UpdateCouponRequest, ValidateCouponRequest};
pub use payments::{CallbackStatusResponse, CreatePaymentRequest, PaymentResponse, PaymentStatusResponse};
pub use plans::{CreatePlanRequest, UpdatePlanRequest};
pub use subscriptions::{
    AssignSubscriptionRequest, DeleteParams, MySubscriptionResponse, PlanSelectionRequest,
    UpdateSubscriptionRequest,
};
