//! In-process store used by tests and `database.backend = "memory"`.
//!
//! Each collection sits behind its own lock; conditional operations check and
//! write under one write guard, which gives them the same atomicity as the
//! single-document updates of the Mongo store.

use super::{
    CouponRepository, PaymentRepository, PlanRepository, StoreError, StoreResult,
    SubscriptionRepository,
};
use crate::models::{
    Coupon, CouponUsage, Payment, PaymentStatus, Plan, Subscription, SubscriptionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    plans: RwLock<HashMap<String, Plan>>,
    coupons: RwLock<HashMap<String, Coupon>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    payments: RwLock<HashMap<String, Payment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn insert_plan(&self, plan: &Plan) -> StoreResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(StoreError::Duplicate(format!("plan id {}", plan.id)));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        Ok(self.plans.read().await.get(id).cloned())
    }

    async fn list_plans(&self, active_only: bool) -> StoreResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .read()
            .await
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(plans)
    }

    async fn replace_plan(&self, plan: &Plan) -> StoreResult<bool> {
        let mut plans = self.plans.write().await;
        match plans.get_mut(&plan.id) {
            Some(existing) => {
                *existing = plan.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_plan(&self, id: &str) -> StoreResult<bool> {
        Ok(self.plans.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        let mut coupons = self.coupons.write().await;
        if coupons.values().any(|c| c.code == coupon.code) {
            return Err(StoreError::Duplicate(format!("coupon code {}", coupon.code)));
        }
        coupons.insert(coupon.id.clone(), coupon.clone());
        Ok(())
    }

    async fn get_coupon(&self, id: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.coupons.read().await.get(id).cloned())
    }

    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self
            .coupons
            .read()
            .await
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_coupons(&self) -> StoreResult<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self.coupons.read().await.values().cloned().collect();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn replace_coupon(&self, coupon: &Coupon) -> StoreResult<bool> {
        let mut coupons = self.coupons.write().await;
        if coupons
            .values()
            .any(|c| c.code == coupon.code && c.id != coupon.id)
        {
            return Err(StoreError::Duplicate(format!("coupon code {}", coupon.code)));
        }
        match coupons.get_mut(&coupon.id) {
            Some(existing) => {
                let used_count = existing.used_count;
                let used_by = std::mem::take(&mut existing.used_by);
                *existing = Coupon {
                    used_count,
                    used_by,
                    ..coupon.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_coupon(&self, id: &str) -> StoreResult<bool> {
        Ok(self.coupons.write().await.remove(id).is_some())
    }

    async fn reserve_usage(
        &self,
        coupon_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut coupons = self.coupons.write().await;
        let Some(coupon) = coupons.get_mut(coupon_id) else {
            return Ok(false);
        };
        if coupon.is_exhausted() || coupon.used_by_user(user_id) {
            return Ok(false);
        }
        coupon.used_count += 1;
        coupon.used_by.push(CouponUsage {
            user_id: user_id.to_string(),
            used_at: at,
        });
        coupon.updated_at = at;
        Ok(true)
    }

    async fn release_usage(&self, coupon_id: &str, user_id: &str) -> StoreResult<()> {
        let mut coupons = self.coupons.write().await;
        if let Some(coupon) = coupons.get_mut(coupon_id) {
            if coupon.used_by_user(user_id) {
                coupon.used_by.retain(|usage| usage.user_id != user_id);
                coupon.used_count = coupon.used_count.saturating_sub(1);
                coupon.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::Duplicate(format!(
                "subscription id {}",
                subscription.id
            )));
        }
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn find_latest_subscription(
        &self,
        user_id: &str,
        statuses: &[SubscriptionStatus],
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && statuses.contains(&s.status))
            .max_by_key(|s| s.end_date)
            .cloned())
    }

    async fn list_subscriptions_for_user(&self, user_id: &str) -> StoreResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn set_user_subscription_status(
        &self,
        user_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> StoreResult<u64> {
        let now = Utc::now();
        let mut changed = 0;
        for subscription in self.subscriptions.write().await.values_mut() {
            if subscription.user_id == user_id && from.contains(&subscription.status) {
                subscription.status = to;
                subscription.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> StoreResult<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(id) {
            Some(subscription) => {
                subscription.status = status;
                subscription.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn expire_subscription(&self, id: &str, end_date: DateTime<Utc>) -> StoreResult<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(id) {
            Some(subscription)
                if subscription.status == SubscriptionStatus::Active
                    && subscription.end_date == end_date =>
            {
                subscription.status = SubscriptionStatus::Expired;
                subscription.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_subscription_period(
        &self,
        id: &str,
        plan_id: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(id) {
            Some(subscription) => {
                subscription.plan_id = plan_id.to_string();
                subscription.start_date = start_date;
                subscription.end_date = end_date;
                subscription.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(&self, id: &str) -> StoreResult<bool> {
        Ok(self.subscriptions.write().await.remove(id).is_some())
    }

    async fn delete_subscriptions_for_user(&self, user_id: &str) -> StoreResult<u64> {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, s| s.user_id != user_id);
        Ok((before - subscriptions.len()) as u64)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        if payments.values().any(|p| {
            p.id == payment.id
                || p.external_id == payment.external_id
                || p.order_id == payment.order_id
        }) {
            return Err(StoreError::Duplicate(format!(
                "payment {}",
                payment.order_id
            )));
        }
        payments.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> StoreResult<Option<Payment>> {
        Ok(self.payments.read().await.get(id).cloned())
    }

    async fn find_payment(&self, identifier: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| {
                p.id == identifier || p.external_id == identifier || p.order_id == identifier
            })
            .cloned())
    }

    async fn list_payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn update_payment_status(
        &self,
        id: &str,
        expected: PaymentStatus,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(id) {
            Some(payment) if payment.status == expected => {
                payment.status = status;
                if paid_at.is_some() {
                    payment.paid_at = paid_at;
                }
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_webhook_received(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(payment) = self.payments.write().await.get_mut(id) {
            payment.webhook_received = true;
            payment.webhook_received_at = Some(at);
            payment.updated_at = at;
        }
        Ok(())
    }

    async fn claim_subscription(&self, id: &str, subscription_id: &str) -> StoreResult<bool> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(id) {
            Some(payment) if payment.subscription_id.is_none() => {
                payment.subscription_id = Some(subscription_id.to_string());
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_subscription_claim(
        &self,
        id: &str,
        subscription_id: &str,
    ) -> StoreResult<()> {
        if let Some(payment) = self.payments.write().await.get_mut(id) {
            if payment.subscription_id.as_deref() == Some(subscription_id) {
                payment.subscription_id = None;
                payment.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}
