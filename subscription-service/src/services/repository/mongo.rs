//! MongoDB-backed store.

use super::{
    CouponRepository, PaymentRepository, PlanRepository, StoreError, StoreResult,
    SubscriptionRepository,
};
use crate::models::{Coupon, Payment, PaymentStatus, Plan, Subscription, SubscriptionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, to_document, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};

const DUPLICATE_KEY: i32 = 11000;

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(ref write_error)) = *err.kind {
            if write_error.code == DUPLICATE_KEY {
                return StoreError::Duplicate(write_error.message.clone());
            }
        }
        StoreError::Backend(err.into())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

fn bson_of<T: serde::Serialize>(value: &T) -> StoreResult<Bson> {
    Ok(to_bson(value)?)
}

fn status_list(statuses: &[SubscriptionStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

#[derive(Clone)]
pub struct MongoStore {
    plans: Collection<Plan>,
    coupons: Collection<Coupon>,
    subscriptions: Collection<Subscription>,
    payments: Collection<Payment>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            plans: db.collection("plans"),
            coupons: db.collection("coupons"),
            subscriptions: db.collection("subscriptions"),
            payments: db.collection("payments"),
        }
    }

    /// Create the unique and lookup indexes this service relies on.
    pub async fn init_indexes(&self) -> anyhow::Result<()> {
        let unique = |name: &str| {
            IndexOptions::builder()
                .name(name.to_string())
                .unique(true)
                .build()
        };
        let named = |name: &str| IndexOptions::builder().name(name.to_string()).build();

        self.coupons
            .create_indexes(
                [
                    IndexModel::builder()
                        .keys(doc! { "code": 1 })
                        .options(unique("coupon_code_idx"))
                        .build(),
                    IndexModel::builder()
                        .keys(doc! { "is_active": 1 })
                        .options(named("coupon_active_idx"))
                        .build(),
                ],
                None,
            )
            .await?;

        self.subscriptions
            .create_indexes(
                [
                    IndexModel::builder()
                        .keys(doc! { "user_id": 1, "status": 1 })
                        .options(named("subscription_user_status_idx"))
                        .build(),
                    IndexModel::builder()
                        .keys(doc! { "end_date": 1 })
                        .options(named("subscription_end_date_idx"))
                        .build(),
                ],
                None,
            )
            .await?;

        self.payments
            .create_indexes(
                [
                    IndexModel::builder()
                        .keys(doc! { "external_id": 1 })
                        .options(unique("payment_external_id_idx"))
                        .build(),
                    IndexModel::builder()
                        .keys(doc! { "order_id": 1 })
                        .options(unique("payment_order_id_idx"))
                        .build(),
                    IndexModel::builder()
                        .keys(doc! { "user_id": 1 })
                        .options(named("payment_user_idx"))
                        .build(),
                    IndexModel::builder()
                        .keys(doc! { "status": 1 })
                        .options(named("payment_status_idx"))
                        .build(),
                ],
                None,
            )
            .await?;

        tracing::info!("Subscription service indexes initialized");
        Ok(())
    }

    fn touch(set: &mut Document) -> StoreResult<()> {
        set.insert("updated_at", bson_of(&Utc::now())?);
        Ok(())
    }
}

// Timestamps and decimals are stored in their serde string form, so ordering
// is done here rather than with a server-side sort.

#[async_trait]
impl PlanRepository for MongoStore {
    async fn insert_plan(&self, plan: &Plan) -> StoreResult<()> {
        self.plans.insert_one(plan, None).await?;
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        Ok(self.plans.find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_plans(&self, active_only: bool) -> StoreResult<Vec<Plan>> {
        let filter = if active_only {
            doc! { "is_active": true }
        } else {
            doc! {}
        };
        let mut plans: Vec<Plan> = self.plans.find(filter, None).await?.try_collect().await?;
        plans.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(plans)
    }

    async fn replace_plan(&self, plan: &Plan) -> StoreResult<bool> {
        let result = self
            .plans
            .replace_one(doc! { "_id": plan.id.as_str() }, plan, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_plan(&self, id: &str) -> StoreResult<bool> {
        let result = self.plans.delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl CouponRepository for MongoStore {
    async fn insert_coupon(&self, coupon: &Coupon) -> StoreResult<()> {
        self.coupons.insert_one(coupon, None).await?;
        Ok(())
    }

    async fn get_coupon(&self, id: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.coupons.find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.coupons.find_one(doc! { "code": code }, None).await?)
    }

    async fn list_coupons(&self) -> StoreResult<Vec<Coupon>> {
        let mut coupons: Vec<Coupon> = self.coupons.find(doc! {}, None).await?.try_collect().await?;
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(coupons)
    }

    async fn replace_coupon(&self, coupon: &Coupon) -> StoreResult<bool> {
        let mut set = to_document(coupon)?;
        set.remove("_id");
        set.remove("used_count");
        set.remove("used_by");
        let result = self
            .coupons
            .update_one(doc! { "_id": coupon.id.as_str() }, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_coupon(&self, id: &str) -> StoreResult<bool> {
        let result = self.coupons.delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn reserve_usage(
        &self,
        coupon_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let at = bson_of(&at)?;
        let filter = doc! {
            "_id": coupon_id,
            "used_by.user_id": { "$ne": user_id },
            "$or": [
                { "usage_limit": Bson::Null },
                { "$expr": { "$lt": ["$used_count", "$usage_limit"] } },
            ],
        };
        let update = doc! {
            "$inc": { "used_count": 1 },
            "$push": { "used_by": { "user_id": user_id, "used_at": at.clone() } },
            "$set": { "updated_at": at },
        };
        let result = self.coupons.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn release_usage(&self, coupon_id: &str, user_id: &str) -> StoreResult<()> {
        let filter = doc! { "_id": coupon_id, "used_by.user_id": user_id };
        let mut set = Document::new();
        Self::touch(&mut set)?;
        let update = doc! {
            "$inc": { "used_count": -1 },
            "$pull": { "used_by": { "user_id": user_id } },
            "$set": set,
        };
        self.coupons.update_one(filter, update, None).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MongoStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        self.subscriptions.insert_one(subscription, None).await?;
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.subscriptions.find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_latest_subscription(
        &self,
        user_id: &str,
        statuses: &[SubscriptionStatus],
    ) -> StoreResult<Option<Subscription>> {
        let filter = doc! {
            "user_id": user_id,
            "status": { "$in": status_list(statuses) },
        };
        let subscriptions: Vec<Subscription> =
            self.subscriptions.find(filter, None).await?.try_collect().await?;
        Ok(subscriptions.into_iter().max_by_key(|s| s.end_date))
    }

    async fn list_subscriptions_for_user(&self, user_id: &str) -> StoreResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .find(doc! { "user_id": user_id }, None)
            .await?
            .try_collect()
            .await?;
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn set_user_subscription_status(
        &self,
        user_id: &str,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> StoreResult<u64> {
        let filter = doc! {
            "user_id": user_id,
            "status": { "$in": status_list(from) },
        };
        let mut set = doc! { "status": to.as_str() };
        Self::touch(&mut set)?;
        let result = self
            .subscriptions
            .update_many(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.modified_count)
    }

    async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> StoreResult<bool> {
        let mut set = doc! { "status": status.as_str() };
        Self::touch(&mut set)?;
        let result = self
            .subscriptions
            .update_one(doc! { "_id": id }, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn expire_subscription(&self, id: &str, end_date: DateTime<Utc>) -> StoreResult<bool> {
        let filter = doc! {
            "_id": id,
            "status": SubscriptionStatus::Active.as_str(),
            "end_date": bson_of(&end_date)?,
        };
        let mut set = doc! { "status": SubscriptionStatus::Expired.as_str() };
        Self::touch(&mut set)?;
        let result = self
            .subscriptions
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn update_subscription_period(
        &self,
        id: &str,
        plan_id: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut set = doc! {
            "plan_id": plan_id,
            "start_date": bson_of(&start_date)?,
            "end_date": bson_of(&end_date)?,
        };
        Self::touch(&mut set)?;
        let result = self
            .subscriptions
            .update_one(doc! { "_id": id }, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_subscription(&self, id: &str) -> StoreResult<bool> {
        let result = self
            .subscriptions
            .delete_one(doc! { "_id": id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn delete_subscriptions_for_user(&self, user_id: &str) -> StoreResult<u64> {
        let result = self
            .subscriptions
            .delete_many(doc! { "user_id": user_id }, None)
            .await?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl PaymentRepository for MongoStore {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.payments.insert_one(payment, None).await?;
        Ok(())
    }

    async fn get_payment(&self, id: &str) -> StoreResult<Option<Payment>> {
        Ok(self.payments.find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_payment(&self, identifier: &str) -> StoreResult<Option<Payment>> {
        let filter = doc! {
            "$or": [
                { "_id": identifier },
                { "external_id": identifier },
                { "order_id": identifier },
            ]
        };
        Ok(self.payments.find_one(filter, None).await?)
    }

    async fn list_payments_for_user(&self, user_id: &str) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .find(doc! { "user_id": user_id }, None)
            .await?
            .try_collect()
            .await?;
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
        let filter = doc! { "_id": id, "status": expected.as_str() };
        let mut set = doc! { "status": status.as_str() };
        if let Some(paid_at) = paid_at {
            set.insert("paid_at", bson_of(&paid_at)?);
        }
        Self::touch(&mut set)?;
        let result = self
            .payments
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn mark_webhook_received(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let at = bson_of(&at)?;
        let update = doc! {
            "$set": {
                "webhook_received": true,
                "webhook_received_at": at.clone(),
                "updated_at": at,
            }
        };
        self.payments
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(())
    }

    async fn claim_subscription(&self, id: &str, subscription_id: &str) -> StoreResult<bool> {
        let filter = doc! { "_id": id, "subscription_id": Bson::Null };
        let mut set = doc! { "subscription_id": subscription_id };
        Self::touch(&mut set)?;
        let result = self
            .payments
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn release_subscription_claim(
        &self,
        id: &str,
        subscription_id: &str,
    ) -> StoreResult<()> {
        let filter = doc! { "_id": id, "subscription_id": subscription_id };
        let mut set = doc! { "subscription_id": Bson::Null };
        Self::touch(&mut set)?;
        self.payments
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(())
    }
}
