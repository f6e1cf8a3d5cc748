//! Consultancy Payments
//!
//! Payment order ledger, gateway confirmation reconciliation and entitlement
//! fulfillment for the consultancy marketplace.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::db::DbPool;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires every service against one pool and one gateway.
    pub fn new(
        db: Arc<DbPool>,
        config: config::AppConfig,
        gateway: Arc<dyn gateway::PaymentGateway>,
        notifications: notifications::NotificationDispatcher,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            gateway,
            notifications,
            config.default_currency.clone(),
        );
        Self {
            db,
            config,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        // Checkout and confirmation
        .route("/payments/orders", post(handlers::payments::create_checkout))
        .route(
            "/payments/orders/:order_id",
            get(handlers::payments::get_order),
        )
        .route(
            "/payments/orders/:order_id/checkout",
            post(handlers::payments::checkout_existing_order),
        )
        .route("/payments/verify", post(handlers::payments::verify_payment))
        // Signature-verified, no bearer auth
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        // Consultations
        .route(
            "/consultations",
            post(handlers::consultations::request_consultation)
                .get(handlers::consultations::list_consultations),
        )
        .route(
            "/consultations/:order_id/activate",
            put(handlers::consultations::activate_consultation),
        )
        .route(
            "/buyers/:buyer_id/entitlements",
            get(handlers::entitlements::list_buyer_entitlements),
        )
}

/// Liveness plus database reachability.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service health", body = crate::ApiResponse<serde_json::Value>)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "Health check database ping failed");
            "unhealthy"
        }
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "version": env!("CARGO_PKG_VERSION"),
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use sea_orm::{ConnectOptions, Database};
    use sea_orm_migration::MigratorTrait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::db::DbPool;
    use crate::errors::ServiceError;
    use crate::gateway::signature::{client_signature_payload, hmac_sha256_hex};
    use crate::gateway::{
        razorpay, GatewayEvent, PaymentGateway, RemoteOrder, RemoteOrderRequest,
    };
    use crate::migrator::Migrator;

    pub const KEY_SECRET: &str = "test_key_secret";
    pub const WEBHOOK_SECRET: &str = "test_webhook_secret";

    /// Single-connection in-memory SQLite with the schema applied.
    pub async fn memory_db() -> Arc<DbPool> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    /// Gateway double that signs with fixed secrets and opens numbered remote orders.
    #[derive(Default)]
    pub struct StubGateway {
        pub created: AtomicUsize,
        pub unavailable: bool,
    }

    impl StubGateway {
        pub fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Default::default()
            }
        }

        pub fn created_count(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_remote_order(
            &self,
            request: RemoteOrderRequest,
        ) -> Result<RemoteOrder, ServiceError> {
            if self.unavailable {
                return Err(ServiceError::GatewayUnavailable("stub offline".into()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RemoteOrder {
                id: format!("order_stub_{}", n),
                amount_minor: request.amount_minor,
                currency: request.currency,
            })
        }

        fn verify_client_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
            sign_client(order_id, payment_id) == signature
        }

        fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
            sign_webhook(raw_body) == signature
        }

        fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<GatewayEvent, ServiceError> {
            razorpay::parse_webhook_event(raw_body)
        }
    }

    pub fn sign_client(order_id: &str, payment_id: &str) -> String {
        hmac_sha256_hex(
            KEY_SECRET.as_bytes(),
            client_signature_payload(order_id, payment_id).as_bytes(),
        )
        .unwrap()
    }

    pub fn sign_webhook(body: &[u8]) -> String {
        hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body).unwrap()
    }

    /// Razorpay-shaped payment webhook body.
    pub fn payment_event(event: &str, order_id: &str, payment_id: &str, amount_minor: i64) -> Vec<u8> {
        let error_description = (event == "payment.failed").then_some("Payment declined by bank");
        serde_json::to_vec(&serde_json::json!({
            "entity": "event",
            "event": event,
            "payload": {
                "payment": {
                    "entity": {
                        "id": payment_id,
                        "order_id": order_id,
                        "amount": amount_minor,
                        "currency": "INR",
                        "method": "upi",
                        "error_description": error_description,
                    }
                }
            }
        }))
        .unwrap()
    }
}
