use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::ValidatedJson;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::models::entitlement::EntitlementSummary;
use crate::models::order::{OrderStatus, OrderSummary};
use crate::services::payments::{CheckoutRequest, CheckoutSession};
use crate::services::reconciler::ClientConfirmation;
use crate::{ApiResponse, ApiResult};

/// Result of the checkout callback
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "orderId": "550e8400-e29b-41d4-a716-446655440000",
    "status": "completed",
    "outcome": "applied",
    "entitlements": []
}))]
pub struct VerifyPaymentResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// `applied`, `already_handled` or `ignored`
    pub outcome: String,
    pub entitlements: Vec<EntitlementSummary>,
}

/// Create a pending order for a cart and open its gateway order
#[utoipa::path(
    post,
    path = "/api/v1/payments/orders",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout opened", body = crate::ApiResponse<CheckoutSession>,
            headers(
                ("X-Request-Id" = String, description = "Unique request identifier"),
            )
        ),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSession>>), ServiceError> {
    let session = state.services.checkout.create_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

/// Open the gateway order for an existing pending order
#[utoipa::path(
    post,
    path = "/api/v1/payments/orders/:order_id/checkout",
    params(
        ("order_id" = Uuid, Path, description = "Local order ID")
    ),
    responses(
        (status = 200, description = "Checkout opened", body = crate::ApiResponse<CheckoutSession>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn checkout_existing_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<CheckoutSession> {
    let session = state.services.checkout.checkout_existing(order_id).await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Get an order
#[utoipa::path(
    get,
    path = "/api/v1/payments/orders/:order_id",
    params(
        ("order_id" = Uuid, Path, description = "Local order ID")
    ),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderSummary>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderSummary> {
    let order = state.services.ledger.get(order_id).await?;
    Ok(Json(ApiResponse::success(OrderSummary::try_from(order)?)))
}

/// Checkout callback posted by the paying client
///
/// Safe to repeat: a payment the webhook already confirmed is reported with its
/// existing entitlements.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = ClientConfirmation,
    responses(
        (status = 200, description = "Payment verified", body = crate::ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Missing fields or invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "No order for the gateway reference", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    ValidatedJson(confirmation): ValidatedJson<ClientConfirmation>,
) -> ApiResult<VerifyPaymentResponse> {
    let verified = state
        .services
        .reconciler
        .verify_client_payment(confirmation)
        .await?;

    let response = VerifyPaymentResponse {
        order_id: verified.order.id,
        status: verified.order.status,
        outcome: verified.outcome.to_string(),
        entitlements: verified
            .entitlements
            .into_iter()
            .map(EntitlementSummary::from)
            .collect(),
    };
    Ok(Json(ApiResponse::success(response)))
}
