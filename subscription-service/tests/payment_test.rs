mod common;

use common::{coupon, decimal, TestApp, TEST_USER_ID};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use subscription_service::models::DiscountType;
use subscription_service::services::gateway::sign_webhook;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn create_payment_applies_coupon() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;
    app.seed_coupon(&coupon("SAVE10", DiscountType::Percentage, 10))
        .await;

    Mock::given(method("POST"))
        .and(path("/payments/gateway/"))
        .and(header("X-API-Key", common::TEST_API_KEY))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 7001,
            "status": "CREATED",
            "url": "https://pay.test/7001",
        })))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let body = app
        .create_payment(TEST_USER_ID, &plan.id, Some("save10"))
        .await;

    assert_eq!(decimal(&body["amount"]), Decimal::from(900));
    assert_eq!(decimal(&body["original_amount"]), Decimal::from(1000));
    assert_eq!(decimal(&body["discount"]), Decimal::from(100));
    assert_eq!(body["coupon_code"], "SAVE10");
    assert_eq!(body["external_id"], "7001");
    assert_eq!(body["payment_url"], "https://pay.test/7001");
    assert_eq!(body["status"], "CREATED");
    assert!(body.get("coupon_warning").is_none());

    let sent = &app.gateway.received_requests().await.unwrap()[0];
    let sent: Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(sent["total_amount"], "900");
    assert_eq!(sent["currency"], "IQD");
    assert!(sent["callback_url"]
        .as_str()
        .unwrap()
        .starts_with("http://frontend.test/payment/callback?order_id=order_test-user_"));
    assert_eq!(sent["webhook_url"], "http://backend.test/payments/webhook");
    assert_eq!(sent["meta_data"]["couponCode"], "SAVE10");

    let stored = app
        .repos
        .coupons
        .find_coupon_by_code("SAVE10")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 1);
    assert!(stored.used_by_user(TEST_USER_ID));
}

#[tokio::test]
async fn invalid_coupon_charges_full_price_with_warning() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;
    app.mock_create_payment(7002).await;

    let body = app
        .create_payment(TEST_USER_ID, &plan.id, Some("BOGUS"))
        .await;

    assert_eq!(decimal(&body["amount"]), Decimal::from(1000));
    assert_eq!(body["coupon_warning"]["reason"], "not_found");
    assert!(body.get("coupon_code").is_none());
}

#[tokio::test]
async fn create_payment_for_unknown_plan_is_404() {
    let app = TestApp::spawn().await;

    let response = app
        .post_as(TEST_USER_ID, "/payments/create", json!({ "plan_id": "missing" }))
        .await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn create_payment_requires_user() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/payments/create"))
        .json(&json!({ "plan_id": "any" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn gateway_rejection_is_bad_gateway_and_frees_coupon() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;
    let mut one = coupon("ONE", DiscountType::Fixed, 100);
    one.usage_limit = Some(1);
    app.seed_coupon(&one).await;

    Mock::given(method("POST"))
        .and(path("/payments/gateway/"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "detail": "Invalid amount" })),
        )
        .mount(&app.gateway)
        .await;

    let response = app
        .post_as(
            TEST_USER_ID,
            "/payments/create",
            json!({ "plan_id": plan.id, "coupon_code": "ONE" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 502);
    let stored = app.repos.coupons.get_coupon(&one.id).await.unwrap().unwrap();
    assert_eq!(stored.used_count, 0);
    assert!(app
        .repos
        .payments
        .list_payments_for_user(TEST_USER_ID)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn paid_webhook_activates_once() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;
    app.mock_create_payment(7003).await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let notification = json!({
        "id": 7003,
        "status": "PAID",
        "order_id": payment["order_id"],
    });

    let first = app.post_webhook(notification.clone()).await;
    assert_eq!(first.status().as_u16(), 200);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["status"], "PAID");
    let subscription_id = first["subscription_id"].as_str().unwrap().to_string();

    let second: Value = app.post_webhook(notification).await.json().await.unwrap();
    assert_eq!(second["subscription_id"], subscription_id.as_str());

    let subscriptions = app
        .repos
        .subscriptions
        .list_subscriptions_for_user(TEST_USER_ID)
        .await
        .unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].id, subscription_id);

    let current: Value = app
        .get_as(TEST_USER_ID, "/subscriptions/my-subscription")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(current["has_subscription"], true);
    assert_eq!(current["subscription"]["plan_id"], plan.id.as_str());
}

#[tokio::test]
async fn late_failure_does_not_downgrade_paid() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7004).await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;
    let order_id = payment["order_id"].clone();

    app.post_webhook(json!({ "id": 7004, "status": "PAID", "order_id": order_id }))
        .await;
    let ack: Value = app
        .post_webhook(json!({ "id": 7004, "status": "FAILED", "order_id": order_id }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(ack["status"], "PAID");
}

#[tokio::test]
async fn webhook_rejects_bad_input() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7005).await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let unknown = app
        .post_webhook(json!({ "id": 1, "status": "PAID", "order_id": "ORD-none" }))
        .await;
    assert_eq!(unknown.status().as_u16(), 404);

    let bad_status = app
        .post_webhook(json!({ "id": 7005, "status": "REFUNDED", "order_id": payment["order_id"] }))
        .await;
    assert_eq!(bad_status.status().as_u16(), 400);

    let missing = app.post_webhook(json!({ "id": 7005, "status": "PAID" })).await;
    assert_eq!(missing.status().as_u16(), 400);

    let stored = app
        .repos
        .payments
        .find_payment("7005")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_str(), "CREATED");
    assert!(stored.subscription_id.is_none());
}

#[tokio::test]
async fn webhook_signature_is_enforced_when_configured() {
    let app = TestApp::spawn_with(|config| {
        config.gateway.webhook_secret = Some(secrecy::Secret::new("whsec".to_string()));
    })
    .await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7006).await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let body = serde_json::to_vec(&json!({
        "id": 7006,
        "status": "PAID",
        "order_id": payment["order_id"],
    }))
    .unwrap();

    let unsigned = app
        .client
        .post(app.url("/payments/webhook"))
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status().as_u16(), 401);

    let signed = app
        .client
        .post(app.url("/payments/webhook"))
        .header("content-type", "application/json")
        .header("X-Webhook-Signature", sign_webhook("whsec", &body).unwrap())
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(signed.status().as_u16(), 200);
}

#[tokio::test]
async fn status_poll_reconciles_with_gateway() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7007).await;
    app.mock_payment_status(7007, "paid").await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let body: Value = app
        .get_as(
            TEST_USER_ID,
            &format!("/payments/status/{}", payment["order_id"].as_str().unwrap()),
        )
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["stale"], false);
    assert_eq!(body["payment"]["status"], "PAID");
    assert!(body["payment"]["subscription_id"].is_string());
}

#[tokio::test]
async fn status_of_someone_elses_payment_is_404() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7008).await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let response = app
        .get_as(
            "intruder",
            &format!("/payments/status/{}", payment["id"].as_str().unwrap()),
        )
        .await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn callback_status_is_stale_when_gateway_fails() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7009).await;
    Mock::given(method("GET"))
        .and(path("/payments/gateway/7009/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.gateway)
        .await;
    let payment = app.create_payment(TEST_USER_ID, &plan.id, None).await;

    let response = app
        .client
        .get(app.url("/payments/callback-status/7009"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stale"], true);
    assert_eq!(body["status"], "CREATED");
    assert_eq!(body["order_id"], payment["order_id"]);
    assert!(body["note"].is_string());
}

#[tokio::test]
async fn my_payments_lists_only_own() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(500, 30).await;
    app.mock_create_payment(7010).await;
    app.mock_create_payment(7011).await;
    app.create_payment(TEST_USER_ID, &plan.id, None).await;
    app.create_payment("other-user", &plan.id, None).await;

    let mine: Vec<Value> = app
        .get_as(TEST_USER_ID, "/payments/my-payments")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["plan_id"], plan.id.as_str());
}
