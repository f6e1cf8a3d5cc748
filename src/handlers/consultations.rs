use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use super::common::{PaginationParams, ValidatedJson};
use crate::auth::StaffUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::models::order::{OrderStatus, OrderSummary};
use crate::services::consultations::{ActivateConsultationRequest, ConsultationRequest};
use crate::{ApiResponse, ApiResult, PaginatedResponse};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConsultationFilter {
    /// e.g. `free_consultation` for the unpriced queue
    pub status: Option<OrderStatus>,
}

/// Request a free consultation
#[utoipa::path(
    post,
    path = "/api/v1/consultations",
    request_body = ConsultationRequest,
    responses(
        (status = 201, description = "Consultation recorded", body = crate::ApiResponse<OrderSummary>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "Consultations"
)]
pub async fn request_consultation(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ConsultationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderSummary>>), ServiceError> {
    let order = state.services.consultations.request(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderSummary::try_from(order)?)),
    ))
}

/// List consultation orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/consultations",
    params(ConsultationFilter, PaginationParams),
    responses(
        (status = 200, description = "Consultation queue", body = crate::ApiResponse<crate::PaginatedResponse<OrderSummary>>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Consultations"
)]
pub async fn list_consultations(
    State(state): State<AppState>,
    _staff: StaffUser,
    Query(filter): Query<ConsultationFilter>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<OrderSummary>> {
    let (page, per_page) = pagination.normalized();
    let (orders, total) = state
        .services
        .consultations
        .list(filter.status, page, per_page)
        .await?;

    let items = orders
        .into_iter()
        .map(OrderSummary::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, page, per_page,
    ))))
}

/// Price a free consultation and make it payable
#[utoipa::path(
    put,
    path = "/api/v1/consultations/:order_id/activate",
    params(
        ("order_id" = Uuid, Path, description = "Consultation order ID")
    ),
    request_body = ActivateConsultationRequest,
    responses(
        (status = 200, description = "Consultation priced", body = crate::ApiResponse<OrderSummary>),
        (status = 400, description = "Invalid price", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is no longer a free consultation", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Consultations"
)]
pub async fn activate_consultation(
    State(state): State<AppState>,
    staff: StaffUser,
    Path(order_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<ActivateConsultationRequest>,
) -> ApiResult<OrderSummary> {
    let order = state
        .services
        .consultations
        .activate(order_id, request.price, staff.id)
        .await?;
    Ok(Json(ApiResponse::success_with_message(
        OrderSummary::try_from(order)?,
        "Consultation priced; awaiting payment",
    )))
}
