//! Payment lifecycle: open a hosted-checkout payment, follow its status as the
//! gateway reports it, and activate the purchased subscription exactly once.

use crate::models::{
    generate_order_id, Payment, PaymentMetadata, PaymentStatus, Transition,
    DEFAULT_PLAN_DURATION_DAYS,
};
use crate::services::coupons::{CouponError, CouponEvaluator, CouponQuote};
use crate::services::gateway::{
    verify_webhook_signature, CreatePaymentRequest, GatewayError, GatewayMetadata, PaymentGateway,
};
use crate::services::metrics::{record_payment_initiated, record_payment_transition};
use crate::services::repository::{PaymentRepository, StoreError};
use crate::services::subscriptions::{ActivationReason, SubscriptionActivator, SubscriptionError};
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Conditional status writes retried after losing a race before giving up.
const MAX_STATUS_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Plan not found or inactive")]
    PlanNotFound,

    #[error("Payment not found")]
    NotFound,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown payment status: {0}")]
    UnknownStatus(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Payment status changed concurrently, retry later")]
    Contended,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Activation(#[from] SubscriptionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checkout parameters that do not change per request.
#[derive(Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub locale: String,
    pub default_callback_url: String,
    pub default_webhook_url: String,
    pub webhook_secret: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub user_id: String,
    pub plan_id: String,
    pub coupon_code: Option<String>,
    pub callback_url: Option<String>,
    pub webhook_url: Option<String>,
}

/// A coupon that was entered but not applied. The purchase still goes
/// through at full price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponWarning {
    pub code: String,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub external_id: String,
    pub order_id: String,
    pub payment_url: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub discount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_warning: Option<CouponWarning>,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub payment: Payment,
    /// The gateway could not be asked; `payment` holds the last stored state.
    pub stale: bool,
    pub note: Option<String>,
}

/// Body the gateway posts to the webhook URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookNotification {
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub payment_id: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

#[derive(Clone)]
pub struct PaymentLifecycle {
    payments: Arc<dyn PaymentRepository>,
    coupons: CouponEvaluator,
    activator: SubscriptionActivator,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl PaymentLifecycle {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        coupons: CouponEvaluator,
        activator: SubscriptionActivator,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            payments,
            coupons,
            activator,
            gateway,
            settings,
        }
    }

    /// Price the plan, open a gateway payment and store it as CREATED.
    #[tracing::instrument(skip(self, input), fields(user_id = %input.user_id, plan_id = %input.plan_id))]
    pub async fn initiate(&self, input: InitiatePayment) -> Result<PaymentIntent, PaymentError> {
        let plan = match self.activator.plan(&input.plan_id, true).await {
            Ok(plan) => plan,
            Err(SubscriptionError::PlanNotFound) => return Err(PaymentError::PlanNotFound),
            Err(e) => return Err(e.into()),
        };

        let code = input
            .coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let (quote, coupon_warning) = match code {
            Some(code) => self.claim_coupon(code, plan.price, &input.user_id).await?,
            None => (None, None),
        };

        let (discount, final_amount) = match &quote {
            Some(q) => (q.discount, q.final_amount),
            None => (Decimal::ZERO, plan.price),
        };

        let now = Utc::now();
        let order_id = generate_order_id(&input.user_id, now);
        let callback_url = with_order_id(
            input
                .callback_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .unwrap_or(&self.settings.default_callback_url),
            &order_id,
        );
        let webhook_url = input
            .webhook_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.settings.default_webhook_url.clone());

        let title = match &quote {
            Some(q) => format!("Subscription - {} ({})", plan.name, q.code),
            None => format!("Subscription - {}", plan.name),
        };

        let metadata = PaymentMetadata {
            plan_name: plan.name.clone(),
            original_amount: plan.price,
            discount,
            final_amount,
            coupon_id: quote.as_ref().map(|q| q.coupon_id.clone()),
            coupon_code: quote.as_ref().map(|q| q.code.clone()),
        };

        let request = CreatePaymentRequest {
            title: title.clone(),
            order_id: order_id.clone(),
            total_amount: final_amount.normalize().to_string(),
            currency: self.settings.currency.clone(),
            locale: self.settings.locale.clone(),
            callback_url: callback_url.clone(),
            webhook_url: webhook_url.clone(),
            meta_data: GatewayMetadata {
                user_id: input.user_id.clone(),
                plan_id: plan.id.clone(),
                plan_name: plan.name.clone(),
                original_amount: plan.price.normalize().to_string(),
                discount: discount.normalize().to_string(),
                final_amount: final_amount.normalize().to_string(),
                coupon_id: metadata.coupon_id.clone(),
                coupon_code: metadata.coupon_code.clone(),
            },
        };

        let created = match self.gateway.create_payment(&request).await {
            Ok(created) => created,
            Err(e) => {
                self.release_coupon(quote.as_ref(), &input.user_id).await;
                return Err(e.into());
            }
        };

        let Some(payment_url) = created.redirect_url().map(str::to_string) else {
            self.release_coupon(quote.as_ref(), &input.user_id).await;
            return Err(GatewayError::InvalidResponse("payment url missing".to_string()).into());
        };

        let status = match created.status.as_deref() {
            None => PaymentStatus::Created,
            Some(raw) => PaymentStatus::parse(raw).unwrap_or_else(|| {
                tracing::warn!(status = raw, "Unrecognised initial gateway status");
                PaymentStatus::Created
            }),
        };

        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            external_id: created.id.clone(),
            order_id: order_id.clone(),
            subscription_id: None,
            plan_id: plan.id.clone(),
            user_id: input.user_id.clone(),
            title: created.title.clone().unwrap_or(title),
            total_amount: final_amount,
            currency: created
                .currency
                .clone()
                .unwrap_or_else(|| self.settings.currency.clone()),
            payment_url,
            status,
            callback_url: created.callback_url.clone().unwrap_or(callback_url),
            webhook_url: Some(created.webhook_url.clone().unwrap_or(webhook_url)),
            metadata,
            webhook_received: false,
            webhook_received_at: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.payments.insert_payment(&payment).await {
            tracing::error!(
                external_id = %payment.external_id,
                order_id = %payment.order_id,
                error = %e,
                "Gateway payment created but not stored"
            );
            self.release_coupon(quote.as_ref(), &input.user_id).await;
            return Err(e.into());
        }

        record_payment_initiated(quote.is_some());
        tracing::info!(
            payment_id = %payment.id,
            external_id = %payment.external_id,
            order_id = %payment.order_id,
            amount = %payment.total_amount,
            "Payment initiated"
        );

        Ok(PaymentIntent {
            id: payment.id,
            external_id: payment.external_id,
            order_id: payment.order_id,
            payment_url: payment.payment_url,
            status: payment.status,
            amount: final_amount,
            original_amount: plan.price,
            discount,
            currency: payment.currency,
            coupon_code: payment.metadata.coupon_code,
            coupon_warning,
        })
    }

    /// Evaluate and reserve a coupon. A coupon that does not apply turns into
    /// a warning, never an error.
    async fn claim_coupon(
        &self,
        code: &str,
        amount: Decimal,
        user_id: &str,
    ) -> Result<(Option<CouponQuote>, Option<CouponWarning>), PaymentError> {
        let attempt = match self.coupons.evaluate(code, amount, user_id).await {
            Ok(quote) => self.coupons.redeem(&quote, user_id).await.map(|()| quote),
            Err(e) => Err(e),
        };

        match attempt {
            Ok(quote) => Ok((Some(quote), None)),
            Err(CouponError::Rejected(rejection)) => {
                tracing::info!(
                    code,
                    reason = rejection.code(),
                    "Coupon not applied, charging full price"
                );
                Ok((
                    None,
                    Some(CouponWarning {
                        code: code.to_uppercase(),
                        reason: rejection.code(),
                        message: rejection.to_string(),
                    }),
                ))
            }
            Err(CouponError::Store(e)) => Err(e.into()),
        }
    }

    async fn release_coupon(&self, quote: Option<&CouponQuote>, user_id: &str) {
        if let Some(quote) = quote {
            self.coupons.release(quote, user_id).await;
        }
    }

    /// Ask the gateway for the current status and apply it. When the gateway
    /// cannot be reached the stored payment comes back marked stale.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, identifier: &str) -> Result<ReconcileOutcome, PaymentError> {
        let payment = self.find(identifier).await?;
        self.reconcile_payment(payment).await
    }

    /// [`PaymentLifecycle::reconcile`] restricted to the caller's own payments.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_for_user(
        &self,
        identifier: &str,
        user_id: &str,
    ) -> Result<ReconcileOutcome, PaymentError> {
        let payment = self.find(identifier).await?;
        if payment.user_id != user_id {
            return Err(PaymentError::NotFound);
        }
        self.reconcile_payment(payment).await
    }

    async fn reconcile_payment(&self, payment: Payment) -> Result<ReconcileOutcome, PaymentError> {
        let reported = match self.gateway.get_payment(&payment.external_id).await {
            Ok(reported) => reported,
            Err(e) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    error = %e,
                    "Gateway status unavailable, returning stored status"
                );
                return Ok(ReconcileOutcome {
                    payment,
                    stale: true,
                    note: Some(e.to_string()),
                });
            }
        };

        let raw = reported.status.unwrap_or_default();
        let Some(incoming) = PaymentStatus::parse(&raw) else {
            tracing::warn!(payment_id = %payment.id, status = %raw, "Gateway reported an unknown status");
            return Ok(ReconcileOutcome {
                payment,
                stale: true,
                note: Some(format!("Unknown gateway status: {raw}")),
            });
        };

        let payment = self.apply_status(payment, incoming).await?;
        Ok(ReconcileOutcome {
            payment,
            stale: false,
            note: None,
        })
    }

    /// Apply a status delivered by the gateway's webhook. Safe to call again
    /// with the same notification.
    #[tracing::instrument(skip(self, notification), fields(external_id = ?notification.id, order_id = ?notification.order_id))]
    pub async fn handle_webhook(
        &self,
        notification: WebhookNotification,
    ) -> Result<WebhookAck, PaymentError> {
        let id = required(notification.id.as_deref(), "id")?;
        let raw_status = required(notification.status.as_deref(), "status")?;
        let order_id = required(notification.order_id.as_deref(), "order_id")?;

        let incoming = PaymentStatus::parse(raw_status)
            .ok_or_else(|| PaymentError::UnknownStatus(raw_status.to_string()))?;

        let payment = match self.payments.find_payment(id).await? {
            Some(payment) => payment,
            None => self.find(order_id).await?,
        };

        self.payments
            .mark_webhook_received(&payment.id, Utc::now())
            .await?;

        let payment = self.apply_status(payment, incoming).await?;
        Ok(WebhookAck {
            payment_id: payment.id,
            status: payment.status,
            subscription_id: payment.subscription_id,
        })
    }

    /// Check `X-Webhook-Signature` when a webhook secret is configured.
    pub fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), PaymentError> {
        let Some(secret) = &self.settings.webhook_secret else {
            return Ok(());
        };
        let signature = signature.ok_or(PaymentError::InvalidSignature)?;

        match verify_webhook_signature(secret.expose_secret(), body, signature) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PaymentError::InvalidSignature),
            Err(e) => {
                tracing::error!(error = %e, "Webhook signature check failed");
                Err(PaymentError::InvalidSignature)
            }
        }
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.payments.list_payments_for_user(user_id).await?)
    }

    async fn find(&self, identifier: &str) -> Result<Payment, PaymentError> {
        self.payments
            .find_payment(identifier)
            .await?
            .ok_or(PaymentError::NotFound)
    }

    /// Run `incoming` through the transition table, then make sure a PAID
    /// payment has its subscription.
    async fn apply_status(
        &self,
        mut payment: Payment,
        incoming: PaymentStatus,
    ) -> Result<Payment, PaymentError> {
        let mut attempts = 0;
        loop {
            match payment.status.transition(incoming) {
                Transition::Unchanged => break,
                Transition::Rejected => {
                    tracing::warn!(
                        payment_id = %payment.id,
                        current = %payment.status,
                        incoming = %incoming,
                        "Ignoring status change from a final state"
                    );
                    return Ok(payment);
                }
                Transition::Apply { activate } => {
                    let now = Utc::now();
                    let paid_at = activate.then_some(now);
                    let from = payment.status;
                    if self
                        .payments
                        .update_payment_status(&payment.id, from, incoming, paid_at)
                        .await?
                    {
                        record_payment_transition(from.as_str(), incoming.as_str());
                        tracing::info!(
                            payment_id = %payment.id,
                            from = %from,
                            to = %incoming,
                            "Payment status updated"
                        );
                        payment.status = incoming;
                        payment.paid_at = paid_at.or(payment.paid_at);
                        payment.updated_at = now;
                        break;
                    }

                    attempts += 1;
                    if attempts >= MAX_STATUS_ATTEMPTS {
                        return Err(PaymentError::Contended);
                    }
                    payment = self
                        .payments
                        .get_payment(&payment.id)
                        .await?
                        .ok_or(PaymentError::NotFound)?;
                }
            }
        }

        if payment.status == PaymentStatus::Paid && payment.subscription_id.is_none() {
            return self.activate_for(payment).await;
        }
        Ok(payment)
    }

    /// Create the subscription a PAID payment bought, at most once.
    ///
    /// Under the user's lock the payment is re-read and the link is claimed
    /// with a pre-generated subscription id before anything is created; a
    /// failed activation gives the claim back.
    async fn activate_for(&self, payment: Payment) -> Result<Payment, PaymentError> {
        let _guard = self.activator.lock_user(&payment.user_id).await;

        let mut payment = self
            .payments
            .get_payment(&payment.id)
            .await?
            .ok_or(PaymentError::NotFound)?;
        if payment.subscription_id.is_some() {
            return Ok(payment);
        }

        let subscription_id = Uuid::new_v4().to_string();
        if !self
            .payments
            .claim_subscription(&payment.id, &subscription_id)
            .await?
        {
            return self
                .payments
                .get_payment(&payment.id)
                .await?
                .ok_or(PaymentError::NotFound);
        }

        match self
            .create_subscription(&payment, subscription_id.clone())
            .await
        {
            Ok(()) => {
                payment.subscription_id = Some(subscription_id);
                Ok(payment)
            }
            Err(e) => {
                if let Err(release_err) = self
                    .payments
                    .release_subscription_claim(&payment.id, &subscription_id)
                    .await
                {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %release_err,
                        "Failed to release subscription claim"
                    );
                }
                Err(e)
            }
        }
    }

    async fn create_subscription(
        &self,
        payment: &Payment,
        subscription_id: String,
    ) -> Result<(), PaymentError> {
        let duration = match self.activator.plan(&payment.plan_id, false).await {
            Ok(plan) => plan.duration,
            Err(SubscriptionError::PlanNotFound) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    plan_id = %payment.plan_id,
                    "Paid plan no longer exists, using default duration"
                );
                DEFAULT_PLAN_DURATION_DAYS
            }
            Err(e) => return Err(e.into()),
        };

        self.activator
            .activate_locked(
                subscription_id,
                &payment.user_id,
                &payment.plan_id,
                duration,
                ActivationReason::Payment,
                Utc::now(),
            )
            .await?;
        Ok(())
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, PaymentError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(PaymentError::MissingField(field))
}

/// Append `order_id` to the callback URL so the return page can look the
/// payment up.
fn with_order_id(base: &str, order_id: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}order_id={}",
        base,
        separator,
        urlencoding::encode(order_id)
    )
}

/// Gateway ids arrive as numbers or strings.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
