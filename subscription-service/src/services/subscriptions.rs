//! Subscription activation and renewal.
//!
//! All writes for one user go through that user's lock, so the
//! "cancel the active ones, then create one" sequence never interleaves with
//! another activation for the same user inside this process.

use crate::models::{Plan, Subscription, SubscriptionStatus};
use crate::services::metrics::record_subscription_activated;
use crate::services::repository::{PlanRepository, StoreError, SubscriptionRepository};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Plan not found or inactive")]
    PlanNotFound,

    #[error("Subscription not found")]
    NotFound,

    #[error("End date must not be before start date")]
    InvalidPeriod,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a subscription was activated, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationReason {
    Payment,
    Subscribe,
    Renew,
    Assign,
}

impl ActivationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationReason::Payment => "payment",
            ActivationReason::Subscribe => "subscribe",
            ActivationReason::Renew => "renew",
            ActivationReason::Assign => "assign",
        }
    }
}

/// One async mutex per user id.
#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }
}

/// The caller's current subscription.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscription {
    pub subscription: Option<Subscription>,
    /// The latest active subscription had already run out and was just
    /// marked expired.
    pub is_expired: bool,
}

#[derive(Clone)]
pub struct SubscriptionActivator {
    subscriptions: Arc<dyn SubscriptionRepository>,
    plans: Arc<dyn PlanRepository>,
    locks: UserLocks,
}

impl SubscriptionActivator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        plans: Arc<dyn PlanRepository>,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            locks: UserLocks::default(),
        }
    }

    /// Serialize subscription writes for `user_id` until the guard drops.
    pub async fn lock_user(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(user_id).await
    }

    pub async fn plan(&self, plan_id: &str, require_active: bool) -> Result<Plan, SubscriptionError> {
        match self.plans.get_plan(plan_id).await? {
            Some(plan) if plan.is_active || !require_active => Ok(plan),
            _ => Err(SubscriptionError::PlanNotFound),
        }
    }

    #[tracing::instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn activate(
        &self,
        user_id: &str,
        plan: &Plan,
        reason: ActivationReason,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.lock_user(user_id).await;
        self.activate_locked(
            Uuid::new_v4().to_string(),
            user_id,
            &plan.id,
            plan.duration,
            reason,
            Utc::now(),
        )
        .await
    }

    /// Cancel the user's active subscriptions and create `subscription_id`.
    /// The caller must hold the user's lock.
    pub async fn activate_locked(
        &self,
        subscription_id: String,
        user_id: &str,
        plan_id: &str,
        duration_days: u32,
        reason: ActivationReason,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let cancelled = self
            .subscriptions
            .set_user_subscription_status(
                user_id,
                &[SubscriptionStatus::Active],
                SubscriptionStatus::Cancelled,
            )
            .await?;

        let subscription =
            Subscription::starting_at(subscription_id, user_id, plan_id, duration_days, now);
        self.subscriptions.insert_subscription(&subscription).await?;

        record_subscription_activated(reason.as_str());
        tracing::info!(
            subscription_id = %subscription.id,
            user_id,
            plan_id,
            end_date = %subscription.end_date,
            cancelled,
            reason = reason.as_str(),
            "Subscription activated"
        );
        Ok(subscription)
    }

    /// Extend the active subscription by one plan period from its current end,
    /// even when that end has passed without a read marking it expired.
    /// Starts a fresh one when nothing is active.
    #[tracing::instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn renew(&self, user_id: &str, plan: &Plan) -> Result<Subscription, SubscriptionError> {
        self.renew_at(user_id, plan, Utc::now()).await
    }

    pub async fn renew_at(
        &self,
        user_id: &str,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let _guard = self.lock_user(user_id).await;

        let active = self
            .subscriptions
            .find_latest_subscription(user_id, &[SubscriptionStatus::Active])
            .await?;

        if let Some(mut subscription) = active {
            let end_date = subscription.end_date + Duration::days(i64::from(plan.duration));
            let updated = self
                .subscriptions
                .update_subscription_period(
                    &subscription.id,
                    &plan.id,
                    subscription.start_date,
                    end_date,
                )
                .await?;
            if !updated {
                return Err(SubscriptionError::NotFound);
            }

            subscription.plan_id = plan.id.clone();
            subscription.end_date = end_date;
            subscription.updated_at = now;
            tracing::info!(
                subscription_id = %subscription.id,
                end_date = %end_date,
                "Subscription extended"
            );
            return Ok(subscription);
        }

        self.subscriptions
            .set_user_subscription_status(
                user_id,
                &[SubscriptionStatus::Active, SubscriptionStatus::Expired],
                SubscriptionStatus::Cancelled,
            )
            .await?;
        self.activate_locked(
            Uuid::new_v4().to_string(),
            user_id,
            &plan.id,
            plan.duration,
            ActivationReason::Renew,
            now,
        )
        .await
    }

    /// Latest active subscription by end date. One that has run out is
    /// marked expired on the way.
    pub async fn current(&self, user_id: &str) -> Result<CurrentSubscription, SubscriptionError> {
        self.current_at(user_id, Utc::now()).await
    }

    pub async fn current_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CurrentSubscription, SubscriptionError> {
        let Some(mut subscription) = self
            .subscriptions
            .find_latest_subscription(user_id, &[SubscriptionStatus::Active])
            .await?
        else {
            return Ok(CurrentSubscription {
                subscription: None,
                is_expired: false,
            });
        };

        if !subscription.is_lapsed(now) {
            return Ok(CurrentSubscription {
                subscription: Some(subscription),
                is_expired: false,
            });
        }

        if !self
            .subscriptions
            .expire_subscription(&subscription.id, subscription.end_date)
            .await?
        {
            // Extended or cancelled since the read; report what is stored now.
            let stored = self
                .subscriptions
                .get_subscription(&subscription.id)
                .await?
                .filter(|s| s.status == SubscriptionStatus::Active && !s.is_lapsed(now));
            return Ok(CurrentSubscription {
                subscription: stored,
                is_expired: false,
            });
        }
        subscription.status = SubscriptionStatus::Expired;
        tracing::info!(subscription_id = %subscription.id, "Subscription expired");

        Ok(CurrentSubscription {
            subscription: Some(subscription),
            is_expired: true,
        })
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Subscription>, SubscriptionError> {
        Ok(self.subscriptions.list_subscriptions_for_user(user_id).await?)
    }

    /// Cancel every active subscription of the user. Returns how many changed.
    pub async fn cancel_for_user(&self, user_id: &str) -> Result<u64, SubscriptionError> {
        let _guard = self.lock_user(user_id).await;
        Ok(self
            .subscriptions
            .set_user_subscription_status(
                user_id,
                &[SubscriptionStatus::Active],
                SubscriptionStatus::Cancelled,
            )
            .await?)
    }

    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64, SubscriptionError> {
        let _guard = self.lock_user(user_id).await;
        Ok(self.subscriptions.delete_subscriptions_for_user(user_id).await?)
    }

    /// Move the start and/or end date of one subscription.
    pub async fn update_period(
        &self,
        id: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut subscription = self
            .subscriptions
            .get_subscription(id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        let start_date = start_date.unwrap_or(subscription.start_date);
        let end_date = end_date.unwrap_or(subscription.end_date);
        if end_date < start_date {
            return Err(SubscriptionError::InvalidPeriod);
        }

        if !self
            .subscriptions
            .update_subscription_period(id, &subscription.plan_id, start_date, end_date)
            .await?
        {
            return Err(SubscriptionError::NotFound);
        }

        subscription.start_date = start_date;
        subscription.end_date = end_date;
        subscription.updated_at = Utc::now();
        Ok(subscription)
    }

    pub async fn cancel(&self, id: &str) -> Result<(), SubscriptionError> {
        if self
            .subscriptions
            .set_subscription_status(id, SubscriptionStatus::Cancelled)
            .await?
        {
            Ok(())
        } else {
            Err(SubscriptionError::NotFound)
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), SubscriptionError> {
        if self.subscriptions.delete_subscription(id).await? {
            Ok(())
        } else {
            Err(SubscriptionError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::MemoryStore;
    use rust_decimal::Decimal;

    fn plan(duration: u32) -> Plan {
        Plan {
            id: Uuid::new_v4().to_string(),
            name: "Pro".to_string(),
            description: String::new(),
            price: Decimal::from(1000),
            duration,
            features: vec![],
            is_active: true,
            created_at: Utc::now(),
        }
    }

    async fn activator() -> (SubscriptionActivator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            SubscriptionActivator::new(store.clone(), store.clone()),
            store,
        )
    }

    async fn active_count(store: &MemoryStore, user_id: &str) -> usize {
        store
            .list_subscriptions_for_user(user_id)
            .await
            .unwrap()
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .count()
    }

    #[tokio::test]
    async fn activation_leaves_a_single_active_subscription() {
        let (activator, store) = activator().await;
        let plan = plan(30);

        let first = activator
            .activate("u1", &plan, ActivationReason::Subscribe)
            .await
            .unwrap();
        let second = activator
            .activate("u1", &plan, ActivationReason::Subscribe)
            .await
            .unwrap();

        assert_eq!(active_count(&store, "u1").await, 1);
        let first = store.get_subscription(&first.id).await.unwrap().unwrap();
        assert_eq!(first.status, SubscriptionStatus::Cancelled);
        assert_eq!(
            activator.current("u1").await.unwrap().subscription.unwrap().id,
            second.id
        );
    }

    #[tokio::test]
    async fn concurrent_activations_for_one_user_keep_one_active() {
        let (activator, store) = activator().await;
        let plan = plan(30);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let activator = activator.clone();
                let plan = plan.clone();
                tokio::spawn(async move {
                    activator
                        .activate("u1", &plan, ActivationReason::Assign)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(active_count(&store, "u1").await, 1);
    }

    #[tokio::test]
    async fn renew_before_expiry_extends_the_same_document() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let day0 = Utc::now();

        let subscribed = activator
            .activate_locked(
                "s1".to_string(),
                "u1",
                &plan.id,
                plan.duration,
                ActivationReason::Subscribe,
                day0,
            )
            .await
            .unwrap();
        assert_eq!(subscribed.end_date, day0 + Duration::days(30));

        let renewed = activator
            .renew_at("u1", &plan, day0 + Duration::days(10))
            .await
            .unwrap();

        assert_eq!(renewed.id, "s1");
        assert_eq!(renewed.end_date, day0 + Duration::days(60));
        assert_eq!(store.list_subscriptions_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn renew_of_lapsed_active_subscription_extends_from_its_end() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let day0 = Utc::now();
        activator
            .activate_locked(
                "s1".to_string(),
                "u1",
                &plan.id,
                plan.duration,
                ActivationReason::Subscribe,
                day0,
            )
            .await
            .unwrap();

        let renewed = activator
            .renew_at("u1", &plan, day0 + Duration::days(35))
            .await
            .unwrap();

        assert_eq!(renewed.id, "s1");
        assert_eq!(renewed.end_date, day0 + Duration::days(60));
        assert_eq!(store.list_subscriptions_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn renew_without_active_subscription_starts_fresh() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let now = Utc::now();

        let renewed = activator.renew_at("u1", &plan, now).await.unwrap();

        assert_eq!(renewed.start_date, now);
        assert_eq!(renewed.end_date, now + Duration::days(30));
        assert_eq!(active_count(&store, "u1").await, 1);
    }

    #[tokio::test]
    async fn lapsed_subscription_is_expired_on_read() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let day0 = Utc::now();
        activator
            .activate_locked(
                "s1".to_string(),
                "u1",
                &plan.id,
                plan.duration,
                ActivationReason::Subscribe,
                day0,
            )
            .await
            .unwrap();

        let current = activator
            .current_at("u1", day0 + Duration::days(31))
            .await
            .unwrap();

        assert!(current.is_expired);
        let stored = store.get_subscription("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Expired);
        assert!(activator
            .current_at("u1", day0 + Duration::days(31))
            .await
            .unwrap()
            .subscription
            .is_none());
    }

    #[tokio::test]
    async fn expiry_does_not_overwrite_a_concurrent_extension() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let day0 = Utc::now();
        let stale = activator
            .activate_locked(
                "s1".to_string(),
                "u1",
                &plan.id,
                plan.duration,
                ActivationReason::Subscribe,
                day0,
            )
            .await
            .unwrap();

        activator
            .update_period("s1", None, Some(day0 + Duration::days(90)))
            .await
            .unwrap();

        assert!(!store
            .expire_subscription("s1", stale.end_date)
            .await
            .unwrap());
        let stored = store.get_subscription("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);

        let current = activator
            .current_at("u1", day0 + Duration::days(31))
            .await
            .unwrap();
        assert!(!current.is_expired);
        assert_eq!(current.subscription.unwrap().id, "s1");
    }

    #[tokio::test]
    async fn cancelled_subscription_is_not_revived_as_expired() {
        let (activator, store) = activator().await;
        let plan = plan(30);
        let day0 = Utc::now();
        let sub = activator
            .activate_locked(
                "s1".to_string(),
                "u1",
                &plan.id,
                plan.duration,
                ActivationReason::Subscribe,
                day0,
            )
            .await
            .unwrap();
        activator.cancel("s1").await.unwrap();

        assert!(!store.expire_subscription("s1", sub.end_date).await.unwrap());
        let stored = store.get_subscription("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn period_update_rejects_end_before_start() {
        let (activator, _) = activator().await;
        let sub = activator
            .activate("u1", &plan(30), ActivationReason::Assign)
            .await
            .unwrap();

        let err = activator
            .update_period(&sub.id, None, Some(sub.start_date - Duration::days(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidPeriod));
    }

    #[tokio::test]
    async fn inactive_plan_is_refused_when_active_required() {
        let (activator, store) = activator().await;
        let mut plan = plan(30);
        plan.is_active = false;
        store.insert_plan(&plan).await.unwrap();

        assert!(matches!(
            activator.plan(&plan.id, true).await,
            Err(SubscriptionError::PlanNotFound)
        ));
        assert!(activator.plan(&plan.id, false).await.is_ok());
    }
}
