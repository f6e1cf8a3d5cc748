use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::models::entitlement::{EntitlementStatus, EntitlementSummary};
use crate::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize, IntoParams)]
pub struct EntitlementFilter {
    pub status: Option<EntitlementStatus>,
}

/// List a buyer's entitlements
#[utoipa::path(
    get,
    path = "/api/v1/buyers/:buyer_id/entitlements",
    params(
        ("buyer_id" = Uuid, Path, description = "Buyer ID"),
        EntitlementFilter
    ),
    responses(
        (status = 200, description = "Entitlements held by the buyer", body = crate::ApiResponse<Vec<EntitlementSummary>>)
    ),
    tag = "Entitlements"
)]
pub async fn list_buyer_entitlements(
    State(state): State<AppState>,
    Path(buyer_id): Path<Uuid>,
    Query(filter): Query<EntitlementFilter>,
) -> ApiResult<Vec<EntitlementSummary>> {
    let entitlements = state
        .services
        .entitlements
        .list_for_buyer(buyer_id, filter.status)
        .await?;
    Ok(Json(ApiResponse::success(
        entitlements.into_iter().map(EntitlementSummary::from).collect(),
    )))
}
