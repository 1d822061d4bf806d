#![allow(dead_code)]

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use subscription_service::config::Config;
use subscription_service::models::{Coupon, DiscountType, Plan};
use subscription_service::services::{Repositories, SindipayClient};
use subscription_service::startup::Application;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_USER_ID: &str = "test-user";
pub const TEST_ADMIN_ID: &str = "test-admin";
pub const TEST_API_KEY: &str = "test-api-key";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub repos: Repositories,
    pub gateway: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Boot the real router on a random port, backed by the in-memory store
    /// and a wiremock gateway. `customize` may adjust the configuration.
    pub async fn spawn_with(customize: impl FnOnce(&mut Config)) -> Self {
        let gateway = MockServer::start().await;

        let mut config: Config = serde_json::from_value(json!({})).expect("default config");
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.gateway.base_url = gateway.uri();
        config.gateway.api_key = Secret::new(TEST_API_KEY.to_string());
        config.gateway.timeout_secs = 2;
        config.urls.frontend_url = "http://frontend.test".to_string();
        config.urls.backend_url = "http://backend.test".to_string();
        customize(&mut config);

        let repos = Repositories::in_memory();
        let client = SindipayClient::new(&config.gateway).expect("gateway client");

        let app = Application::build_with(config, repos.clone(), Arc::new(client))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            repos,
            gateway,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get_as(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("X-User-ID", user_id)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post_as(&self, user_id: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-User-ID", user_id)
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-User-ID", TEST_ADMIN_ID)
            .header("X-User-Role", "admin")
    }

    pub async fn post_webhook(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/payments/webhook"))
            .json(&body)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn seed_plan(&self, price: i64, duration: u32) -> Plan {
        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Pro".to_string(),
            description: "All features".to_string(),
            price: Decimal::from(price),
            duration,
            features: vec!["pages".to_string(), "forms".to_string()],
            is_active: true,
            created_at: Utc::now(),
        };
        self.repos.plans.insert_plan(&plan).await.expect("seed plan");
        plan
    }

    pub async fn seed_coupon(&self, coupon: &Coupon) {
        self.repos
            .coupons
            .insert_coupon(coupon)
            .await
            .expect("seed coupon");
    }

    /// Gateway answers the next payment creation with `external_id`.
    pub async fn mock_create_payment(&self, external_id: u64) {
        Mock::given(method("POST"))
            .and(path("/payments/gateway/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": external_id,
                "status": "CREATED",
                "url": format!("https://pay.test/{}", external_id),
            })))
            .up_to_n_times(1)
            .mount(&self.gateway)
            .await;
    }

    /// Gateway reports `status` for `external_id` on status polls.
    pub async fn mock_payment_status(&self, external_id: u64, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/payments/gateway/{}/", external_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": external_id,
                "status": status,
            })))
            .mount(&self.gateway)
            .await;
    }

    /// Create a payment for `plan_id` as `user_id` and return the response body.
    pub async fn create_payment(&self, user_id: &str, plan_id: &str, coupon: Option<&str>) -> Value {
        let response = self
            .post_as(
                user_id,
                "/payments/create",
                json!({ "plan_id": plan_id, "coupon_code": coupon }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201, "payment creation failed");
        response.json().await.expect("payment body")
    }
}

pub fn coupon(code: &str, discount_type: DiscountType, value: i64) -> Coupon {
    let now = Utc::now();
    Coupon {
        id: uuid::Uuid::new_v4().to_string(),
        code: code.to_string(),
        discount_type,
        discount_value: Decimal::from(value),
        minimum_amount: Decimal::ZERO,
        maximum_discount: None,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(30),
        usage_limit: None,
        used_count: 0,
        used_by: Vec::new(),
        is_active: true,
        description: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Parse a decimal JSON field, whether it is rendered as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
