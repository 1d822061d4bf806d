//! Hosted-checkout payment gateway client.
//!
//! The gateway creates a payment page for an order and later reports the
//! payment status, either when polled or through a webhook.

use crate::config::GatewayConfig;
use crate::services::metrics::record_gateway_request;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{de, Deserialize, Deserializer, Serialize};
use service_core::middleware::current_request_id;
use service_core::observability::inject_trace_headers;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

const API_KEY_HEADER: &str = "X-API-Key";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway credentials are not configured")]
    NotConfigured,

    /// No answer within the configured timeout. Retryable.
    #[error("Payment gateway did not respond within {0:?}")]
    Timeout(Duration),

    /// Connection or transport failure. Retryable.
    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from payment gateway: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Unreachable(_))
    }

    fn outcome(&self) -> &'static str {
        match self {
            GatewayError::NotConfigured => "not_configured",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Unreachable(_) => "unreachable",
            GatewayError::Rejected { .. } => "rejected",
            GatewayError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Metadata echoed back by the gateway. Field names follow the gateway's
/// camelCase convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetadata {
    pub user_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub original_amount: String,
    pub discount: String,
    pub final_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    pub title: String,
    pub order_id: String,
    /// Decimal amount as a string, e.g. `"900"`.
    pub total_amount: String,
    pub currency: String,
    pub locale: String,
    pub callback_url: String,
    pub webhook_url: String,
    pub meta_data: GatewayMetadata,
}

/// A payment as the gateway reports it. Identifiers and amounts arrive as
/// numbers or strings depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub total_amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl GatewayPayment {
    /// Hosted checkout page for the customer.
    pub fn redirect_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.payment_url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<GatewayPayment, GatewayError>;

    async fn get_payment(&self, external_id: &str) -> Result<GatewayPayment, GatewayError>;
}

#[derive(Clone)]
pub struct SindipayClient {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
    timeout: Duration,
}

impl SindipayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.expose_secret().is_empty()
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(self.api_key.expose_secret())
            .map_err(|_| GatewayError::NotConfigured)?;
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inject_trace_headers(&mut headers, current_request_id().as_deref());
        Ok(headers)
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }

    async fn read_payment(
        &self,
        response: reqwest::Response,
    ) -> Result<GatewayPayment, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        tracing::debug!(status = %status, "Payment gateway response");

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: rejection_message(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn create(&self, request: &CreatePaymentRequest) -> Result<GatewayPayment, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let url = format!("{}/payments/gateway/", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let payment = self.read_payment(response).await?;
        if payment.id.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "payment id missing".to_string(),
            ));
        }

        tracing::info!(
            external_id = %payment.id,
            order_id = %request.order_id,
            amount = %request.total_amount,
            "Gateway payment created"
        );
        Ok(payment)
    }

    async fn fetch(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let url = format!(
            "{}/payments/gateway/{}/",
            self.base_url,
            urlencoding::encode(external_id)
        );
        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_payment(response).await
    }
}

#[async_trait]
impl PaymentGateway for SindipayClient {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let result = self.create(request).await;
        record_outcome("create_payment", &result);
        result
    }

    #[tracing::instrument(skip(self))]
    async fn get_payment(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        let result = self.fetch(external_id).await;
        record_outcome("get_payment", &result);
        result
    }
}

fn record_outcome(operation: &'static str, result: &Result<GatewayPayment, GatewayError>) {
    match result {
        Ok(_) => record_gateway_request(operation, "ok"),
        Err(e) => {
            tracing::warn!(operation, error = %e, "Payment gateway call failed");
            record_gateway_request(operation, e.outcome());
        }
    }
}

/// Pick the most specific message the gateway gave: `detail`, `message`,
/// `error`, then the raw body.
fn rejection_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.chars().take(200).collect()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    optional_string_or_number(deserializer)?
        .ok_or_else(|| de::Error::custom("expected a string or a number, found null"))
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string or a number, found {other}"
        ))),
    }
}

/// Hex HMAC-SHA256 of a webhook body.
pub fn sign_webhook(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex webhook signature.
pub fn verify_webhook_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_webhook(secret, body)?;
    let expected = expected.as_bytes();
    let given = signature.trim().to_ascii_lowercase();
    let given = given.as_bytes();

    if expected.len() != given.len() {
        return Ok(false);
    }

    Ok(expected.ct_eq(given).into())
}
