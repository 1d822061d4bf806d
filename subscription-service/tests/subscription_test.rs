mod common;

use chrono::{DateTime, Duration, Utc};
use common::{TestApp, TEST_USER_ID};
use reqwest::Method;
use serde_json::{json, Value};

fn date(value: &Value) -> DateTime<Utc> {
    value.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn subscribe_works() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;

    let response = app
        .post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": plan.id }))
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "active");
    assert_eq!(
        date(&body["end_date"]) - date(&body["start_date"]),
        Duration::days(30)
    );
}

#[tokio::test]
async fn my_subscription_without_any_is_empty() {
    let app = TestApp::spawn().await;

    let body: Value = app
        .get_as(TEST_USER_ID, "/subscriptions/my-subscription")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["has_subscription"], false);
    assert!(body["subscription"].is_null());
}

#[tokio::test]
async fn subscribing_again_keeps_one_active() {
    let app = TestApp::spawn().await;
    let basic = app.seed_plan(100, 30).await;
    let pro = app.seed_plan(300, 90).await;

    app.post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": basic.id }))
        .await;
    app.post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": pro.id }))
        .await;

    let all: Vec<Value> = app
        .get_as(TEST_USER_ID, "/subscriptions/my-subscriptions")
        .await
        .json()
        .await
        .unwrap();
    let active: Vec<&Value> = all.iter().filter(|s| s["status"] == "active").collect();

    assert_eq!(all.len(), 2);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["plan_id"], pro.id.as_str());
}

#[tokio::test]
async fn renew_extends_active_subscription_in_place() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;

    let first: Value = app
        .post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": plan.id }))
        .await
        .json()
        .await
        .unwrap();
    let renewed: Value = app
        .post_as(TEST_USER_ID, "/subscriptions/renew", json!({ "plan_id": plan.id }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(renewed["_id"], first["_id"]);
    assert_eq!(
        date(&renewed["end_date"]) - date(&first["end_date"]),
        Duration::days(30)
    );
}

#[tokio::test]
async fn subscribe_to_unknown_plan_is_404() {
    let app = TestApp::spawn().await;

    let response = app
        .post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": "nope" }))
        .await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn admin_assign_and_remove() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;

    let forbidden = app
        .post_as(
            TEST_USER_ID,
            "/subscriptions/assign",
            json!({ "user_id": "customer", "plan_id": plan.id }),
        )
        .await;
    assert_eq!(forbidden.status().as_u16(), 403);

    let assigned = app
        .admin(Method::POST, "/subscriptions/assign")
        .json(&json!({ "user_id": "customer", "plan_id": plan.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(assigned.status().as_u16(), 201);

    let cancelled: Value = app
        .admin(Method::DELETE, "/subscriptions/user/customer")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancelled["cancelled"], 1);

    let listed: Vec<Value> = app
        .admin(Method::GET, "/subscriptions/user/customer")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "cancelled");

    let deleted: Value = app
        .admin(Method::DELETE, "/subscriptions/user/customer?delete_permanently=true")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["deleted"], 1);
}

#[tokio::test]
async fn admin_updates_period() {
    let app = TestApp::spawn().await;
    let plan = app.seed_plan(1000, 30).await;
    let created: Value = app
        .post_as(TEST_USER_ID, "/subscriptions/subscribe", json!({ "plan_id": plan.id }))
        .await
        .json()
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap();
    let path = format!("/subscriptions/subscription/{}", id);

    let end = date(&created["start_date"]) + Duration::days(365);
    let updated: Value = app
        .admin(Method::PUT, &path)
        .json(&json!({ "end_date": end }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(date(&updated["end_date"]), end);

    let inverted = app
        .admin(Method::PUT, &path)
        .json(&json!({ "end_date": date(&created["start_date"]) - Duration::days(1) }))
        .send()
        .await
        .unwrap();
    assert_eq!(inverted.status().as_u16(), 400);

    let removed = app.admin(Method::DELETE, &path).send().await.unwrap();
    assert_eq!(removed.status().as_u16(), 204);
}
