#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    middleware, Router,
};
use consultancy_payments::{
    auth::{issue_token, ROLE_STAFF},
    config::AppConfig,
    db,
    gateway::{
        signature::{client_signature_payload, hmac_sha256_hex},
        RazorpayConfig, RazorpayGateway,
    },
    middleware_helpers::request_id_middleware,
    notifications::NotificationDispatcher,
    AppState,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const KEY_SECRET: &str = "integration_key_secret";
pub const WEBHOOK_SECRET: &str = "integration_webhook_secret";
pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Helper harness for spinning up an application state backed by an in-memory SQLite database
/// and a wiremock stand-in for the gateway's REST API.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway_server: MockServer,
    staff_id: Uuid,
    staff_token: String,
}

impl TestApp {
    /// Test application whose gateway opens orders successfully.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(|request: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
                ResponseTemplate::new(200).set_body_json(json!({
                    "id": format!("order_{}", Uuid::new_v4().simple()),
                    "entity": "order",
                    "amount": body["amount"],
                    "currency": body["currency"],
                    "receipt": body["receipt"],
                    "status": "created",
                }))
            })
            .mount(&server)
            .await;
        Self::with_gateway(server).await
    }

    /// Test application whose gateway answers every order creation with a server error.
    pub async fn with_failing_gateway() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;
        Self::with_gateway(server).await
    }

    async fn with_gateway(gateway_server: MockServer) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_base_url = gateway_server.uri();
        cfg.gateway_key_id = "rzp_test_integration".to_string();
        cfg.gateway_key_secret = KEY_SECRET.to_string();
        cfg.gateway_webhook_secret = WEBHOOK_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway = RazorpayGateway::new(RazorpayConfig::from(&cfg)).expect("gateway client");
        let state = AppState::new(
            Arc::new(pool),
            cfg.clone(),
            Arc::new(gateway),
            NotificationDispatcher::default(),
        );

        let router = Router::new()
            .nest("/api/v1", consultancy_payments::api_v1_routes())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state.clone());

        let staff_id = Uuid::new_v4();
        let staff_token = issue_token(JWT_SECRET, staff_id, &[ROLE_STAFF], chrono::Duration::hours(1))
            .expect("encode staff token");

        Self {
            router,
            state,
            gateway_server,
            staff_id,
            staff_token,
        }
    }

    pub fn staff_id(&self) -> Uuid {
        self.staff_id
    }

    /// Bearer token for a staff user.
    pub fn staff_token(&self) -> &str {
        &self.staff_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts raw bytes to the webhook endpoint with the given signature header.
    pub async fn post_webhook(&self, body: &[u8], signature: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Signature", signature);
        }
        let request = builder
            .body(Body::from(body.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Creates a checkout for `prices` and returns the `data` of the response.
    pub async fn checkout(&self, buyer_id: Uuid, items: Vec<Value>) -> Value {
        let response = self
            .request(
                Method::POST,
                "/api/v1/payments/orders",
                Some(json!({ "buyerId": buyer_id, "items": items })),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "checkout failed");
        response_json(response).await["data"].clone()
    }

    /// Posts a correctly signed client confirmation.
    pub async fn verify(&self, gateway_order_id: &str, payment_id: &str) -> axum::response::Response {
        self.request(
            Method::POST,
            "/api/v1/payments/verify",
            Some(json!({
                "externalReference": gateway_order_id,
                "paymentId": payment_id,
                "signature": sign_client(gateway_order_id, payment_id),
            })),
            None,
        )
        .await
    }
}

pub fn line_item(item_id: Uuid, price: &str, billing_period: &str) -> Value {
    json!({
        "itemKind": "service",
        "itemId": item_id,
        "price": price,
        "billingPeriod": billing_period,
        "selectedFeatures": ["priority-support"],
    })
}

pub fn sign_client(order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(
        KEY_SECRET.as_bytes(),
        client_signature_payload(order_id, payment_id).as_bytes(),
    )
    .expect("sign client payload")
}

pub fn sign_webhook(body: &[u8]) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body).expect("sign webhook body")
}

/// Razorpay-shaped payment webhook body.
pub fn payment_event(event: &str, order_id: &str, payment_id: &str, amount_minor: i64) -> Vec<u8> {
    let mut entity = json!({
        "id": payment_id,
        "entity": "payment",
        "order_id": order_id,
        "amount": amount_minor,
        "currency": "INR",
        "status": if event == "payment.captured" { "captured" } else { "failed" },
        "method": "card",
    });
    if event == "payment.failed" {
        entity["error_description"] = json!("Card declined");
    }
    serde_json::to_vec(&json!({
        "entity": "event",
        "account_id": "acc_test",
        "event": event,
        "contains": ["payment"],
        "payload": { "payment": { "entity": entity } },
        "created_at": 1_700_000_000,
    }))
    .expect("serialize webhook body")
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub async fn response_text(response: axum::response::Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}
