//! HTTP handlers for subscription-service.

pub mod coupons;
pub mod health;
pub mod payments;
pub mod plans;
pub mod subscriptions;

pub use health::{health_check, metrics_endpoint, readiness_check};
