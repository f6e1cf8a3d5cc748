mod common;

use axum::http::StatusCode;
use common::{line_item, payment_event, response_json, response_text, sign_webhook, TestApp};
use consultancy_payments::models::order::OrderStatus;
use uuid::Uuid;

async fn pending_checkout(app: &TestApp) -> (Uuid, String) {
    let session = app
        .checkout(Uuid::new_v4(), vec![line_item(Uuid::new_v4(), "500", "one_time")])
        .await;
    (
        session["localOrderId"].as_str().unwrap().parse().unwrap(),
        session["gatewayOrderId"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn failed_payment_marks_order_failed_and_verify_cannot_revive_it() {
    let app = TestApp::new().await;
    let (local_id, reference) = pending_checkout(&app).await;

    let body = payment_event("payment.failed", &reference, "pay_B", 50_000);
    let response = app.post_webhook(&body, Some(&sign_webhook(&body))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, "ok");

    let order = app.state.services.ledger.get(local_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.failure_reason.as_deref(), Some("Card declined"));

    let verified = app.verify(&reference, "pay_B").await;
    assert_eq!(verified.status(), StatusCode::OK);
    let verified = response_json(verified).await;
    assert_eq!(verified["data"]["status"], "failed");
    assert_eq!(verified["data"]["outcome"], "ignored");
    assert!(verified["data"]["entitlements"].as_array().unwrap().is_empty());

    let granted = app
        .state
        .services
        .entitlements
        .list_for_order(local_id)
        .await
        .unwrap();
    assert!(granted.is_empty());
}

#[tokio::test]
async fn duplicate_capture_deliveries_are_acknowledged() {
    let app = TestApp::new().await;
    let (local_id, reference) = pending_checkout(&app).await;
    let body = payment_event("payment.captured", &reference, "pay_B", 50_000);
    let signature = sign_webhook(&body);

    for _ in 0..3 {
        let response = app.post_webhook(&body, Some(&signature)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let granted = app
        .state
        .services
        .entitlements
        .list_for_order(local_id)
        .await
        .unwrap();
    assert_eq!(granted.len(), 1);
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected() {
    let app = TestApp::new().await;
    let (local_id, reference) = pending_checkout(&app).await;
    let body = payment_event("payment.captured", &reference, "pay_B", 50_000);

    let forged = app.post_webhook(&body, Some("00ff")).await;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);

    let unsigned = app.post_webhook(&body, None).await;
    assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);

    // Signature over a different body does not carry over
    let other = payment_event("payment.captured", &reference, "pay_C", 50_000);
    let replayed = app.post_webhook(&body, Some(&sign_webhook(&other))).await;
    assert_eq!(replayed.status(), StatusCode::BAD_REQUEST);

    let order = app.state.services.ledger.get(local_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn signed_events_that_change_nothing_still_get_200() {
    let app = TestApp::new().await;

    let unknown_event = br#"{"event":"order.paid","payload":{}}"#;
    let response = app
        .post_webhook(unknown_event, Some(&sign_webhook(unknown_event)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let unknown_order = payment_event("payment.captured", "order_nobody", "pay_B", 100);
    let response = app
        .post_webhook(&unknown_order, Some(&sign_webhook(&unknown_order)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let malformed = br#"{"event":"payment.captured"}"#;
    let response = app.post_webhook(malformed, Some(&sign_webhook(malformed))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn capture_after_failure_keeps_order_failed() {
    let app = TestApp::new().await;
    let (local_id, reference) = pending_checkout(&app).await;

    let failed = payment_event("payment.failed", &reference, "pay_B", 50_000);
    app.post_webhook(&failed, Some(&sign_webhook(&failed))).await;

    let captured = payment_event("payment.captured", &reference, "pay_C", 50_000);
    let response = app
        .post_webhook(&captured, Some(&sign_webhook(&captured)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.state.services.ledger.get(local_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}
