use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::handlers::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature";

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    params(
        ("X-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")
    ),
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 500, description = "Storage failure; the gateway will retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("Payment webhook without signature header");
        return Err(ServiceError::InvalidSignature);
    };

    // The signature covers the exact bytes received; the body is parsed only after it checks out.
    let outcome = state
        .services
        .reconciler
        .handle_webhook(&body, signature)
        .await?;

    info!(%outcome, "Payment webhook acknowledged");
    Ok((StatusCode::OK, "ok"))
}
