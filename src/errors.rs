use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::order::OrderStatus;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "message": "Invalid state: order 550e8400-e29b-41d4-a716-446655440000 is pending, expected free_consultation",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid transition for order {order_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        order_id: Uuid,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::InvalidSignature
            | Self::InvalidPrice(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState(_) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidSignature => "Payment could not be verified".to_string(),
            Self::GatewayUnavailable(_) => {
                "Payment gateway unavailable, please retry checkout".to_string()
            }
            _ => self.to_string(),
        }
    }

    pub fn not_found_order(order_id: Uuid) -> Self {
        ServiceError::NotFound(format!("Order {} not found", order_id))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

pub type AppError = ServiceError;
