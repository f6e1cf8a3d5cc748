use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::IntoParams;
use validator::Validate;

use crate::errors::ServiceError;

const MAX_PER_PAGE: u64 = 100;

/// JSON body that has been parsed and validated.
///
/// Malformed JSON, unknown fields and `validator` failures are all rejected as
/// `ValidationError` before the handler runs.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ServiceError::ValidationError(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Page and page size clamped to sane bounds
    pub fn normalized(&self) -> (u64, u64) {
        (self.page.max(1), self.per_page.clamp(1, MAX_PER_PAGE))
    }
}
