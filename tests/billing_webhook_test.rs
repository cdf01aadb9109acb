// Integration tests for the payment webhook

use agentvault::api::{create_billing_router, BillingAppState};
use agentvault::billing::BillingStore;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test-webhook-secret";

fn test_app() -> (Router, Arc<BillingStore>) {
    let billing = Arc::new(BillingStore::new(":memory:").unwrap());
    let app = create_billing_router(BillingAppState {
        billing: Arc::clone(&billing),
        webhook_secret: SECRET.to_string(),
    });
    (app, billing)
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

async fn post_webhook(app: &Router, body: &str, signature: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/billing/webhook")
                .header("content-type", "application/json")
                .header("x-signature", signature)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_valid_payment_credits_once() {
    let (app, billing) = test_app();
    let body = r#"{"order_id":"ord_1","user_id":"u1","credits":100}"#;
    let signature = sign(body);

    let (status, json) = post_webhook(&app, body, &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "applied");
    assert_eq!(billing.balance("u1").unwrap(), 100);

    // Replay of the same order id is acknowledged but not re-credited
    let (status, json) = post_webhook(&app, body, &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "replay");
    assert_eq!(billing.balance("u1").unwrap(), 100);
}

#[tokio::test]
async fn test_invalid_signature_rejected_before_parse() {
    let (app, billing) = test_app();
    let body = r#"{"order_id":"ord_1","user_id":"u1","credits":100}"#;

    let (status, _) = post_webhook(&app, body, "deadbeef").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(billing.balance("u1").unwrap(), 0);
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let (app, billing) = test_app();
    let signature = sign(r#"{"order_id":"ord_1","user_id":"u1","credits":100}"#);

    // Same signature, inflated credits
    let tampered = r#"{"order_id":"ord_1","user_id":"u1","credits":100000}"#;
    let (status, _) = post_webhook(&app, tampered, &signature).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(billing.balance("u1").unwrap(), 0);
}

#[tokio::test]
async fn test_missing_signature_header() {
    let (app, _) = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/billing/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"order_id":"o","user_id":"u","credits":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_but_malformed_payload() {
    let (app, _) = test_app();
    let body = r#"{"not":"a payment"}"#;
    let (status, _) = post_webhook(&app, body, &sign(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_positive_credits_rejected() {
    let (app, billing) = test_app();
    let body = r#"{"order_id":"ord_1","user_id":"u1","credits":-50}"#;
    let (status, _) = post_webhook(&app, body, &sign(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(billing.balance("u1").unwrap(), 0);
}
