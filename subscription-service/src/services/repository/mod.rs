//! Persistence ports and their implementations.
//!
//! Every operation that guards an invariant (coupon usage caps, payment status
//! changes, the payment → subscription link) is a single conditional write, so
//! two requests racing on the same document cannot both win.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::models::{Coupon, Payment, PaymentStatus, Plan, Subscription, SubscriptionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key (coupon code, order id, ...) already exists.
    #[error("Duplicate {0}")]
    Duplicate(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn insert_plan(&self, plan: &Plan) -> StoreResult<()>;
    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>>;
    /// Plans ordered by price, cheapest first.
    async fn list_plans(&self, active_only: bool) -> StoreResult<Vec<Plan>>;
    async fn replace_plan(&self, plan: &Plan) -> StoreResult<bool>;
    async fn delete_plan(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()>;
    async fn get_coupon(&self, id: &str) -> StoreResult<Option<Coupon>>;
    /// Lookup by an already normalized code.
    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>>;
    /// Newest first.
    async fn list_coupons(&self) -> StoreResult<Vec<Coupon>>;
    /// Overwrite the editable terms. `used_count` and `used_by` keep their
    /// stored values.
    async fn replace_coupon(&self, coupon: &Coupon) -> StoreResult<bool>;
    async fn delete_coupon(&self, id: &str) -> StoreResult<bool>;

    /// Record a redemption by `user_id`: bump `used_count` and append to
    /// `used_by`, only if the user has not redeemed it yet and the usage limit
    /// is not reached. Returns `false` when either guard fails.
    async fn reserve_usage(
        &self,
        coupon_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Undo a redemption made by [`CouponRepository::reserve_usage`].
    async fn release_usage(&self, coupon_id: &str, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()>;
    async fn get_subscription(&self, id: &str) -> StoreResult<Option<Subscription>>;
    /// The user's subscription with the latest `end_date` among `statuses`.
    async fn find_latest_subscription(
        &self,
        user_id: &str,
        statuses: &[SubscriptionStatus],
    ) -> StoreResult<Option<Subscription>>;
    /// Newest first.
    async fn list_subscriptions_for_user(&self, user_id: &str) -> StoreResult<Vec<Subscription>>;
    /// Bulk status change for one user. Returns the number of documents changed.
    async fn set_user_subscription_status(
        &self,
        user_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> StoreResult<u64>;
    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> StoreResult<bool>;
    /// Mark `id` expired only if it is still active and still ends at
    /// `end_date`. False when it changed since it was read.
    async fn expire_subscription(&self, id: &str, end_date: DateTime<Utc>) -> StoreResult<bool>;
    async fn update_subscription_period(
        &self,
        id: &str,
        plan_id: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn delete_subscription(&self, id: &str) -> StoreResult<bool>;
    async fn delete_subscriptions_for_user(&self, user_id: &str) -> StoreResult<u64>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;
    async fn get_payment(&self, id: &str) -> StoreResult<Option<Payment>>;
    /// Lookup by internal id, gateway id or order id.
    async fn find_payment(&self, identifier: &str) -> StoreResult<Option<Payment>>;
    /// Newest first.
    async fn list_payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>>;

    /// Move from `expected` to `status`. Returns `false` if the stored status
    /// is no longer `expected`.
    async fn update_payment_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    async fn mark_webhook_received(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Link `subscription_id` if no subscription is linked yet.
    async fn claim_subscription(&self, id: &str, subscription_id: &str) -> StoreResult<bool>;

    /// Clear a link made by [`PaymentRepository::claim_subscription`], if it
    /// still points at `subscription_id`.
    async fn release_subscription_claim(&self, id: &str, subscription_id: &str)
        -> StoreResult<()>;
}

/// Handles to every repository, shared by services and handlers.
#[derive(Clone)]
pub struct Repositories {
    pub plans: Arc<dyn PlanRepository>,
    pub coupons: Arc<dyn CouponRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: S) -> Self
    where
        S: PlanRepository
            + CouponRepository
            + SubscriptionRepository
            + PaymentRepository
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            plans: store.clone(),
            coupons: store.clone(),
            subscriptions: store.clone(),
            payments: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(MemoryStore::default())
    }
}
