/*!
 * # Staff Authentication
 *
 * Buyer sessions are owned by the surrounding platform. This module only checks the
 * bearer JWT on staff endpoints (consultation queue and activation):
 *
 * - HS256, signed with `jwt_secret`
 * - `roles` must contain `staff` or `admin`
 *
 * The `sub` claim is the staff member's id and is recorded as `activated_by`.
 */

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::AppState;

pub const ROLE_STAFF: &str = "staff";
pub const ROLE_ADMIN: &str = "admin";

/// Claim structure for staff JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // Staff user id
    pub roles: Vec<String>, // Must include staff or admin
    pub iat: i64,           // Issued at time
    pub exp: i64,           // Expiration time
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authentication token provided")]
    MissingToken,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Staff role required")]
    InsufficientRole,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

/// Authenticated staff member extracted from the `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffUser {
    pub id: Uuid,
    pub roles: Vec<String>,
}

impl StaffUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }
}

/// Signs a token for `staff_id`. Used by the operator CLI and tests.
pub fn issue_token(
    secret: &str,
    staff_id: Uuid,
    roles: &[&str],
    ttl: ChronoDuration,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        sub: staff_id.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::TokenCreation(e.to_string()))
}

/// Validates a bearer token and checks the staff role.
pub fn authenticate_staff(secret: &str, token: &str) -> Result<StaffUser, AuthError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?
    .claims;

    let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
    let user = StaffUser {
        id,
        roles: claims.roles,
    };
    if !(user.has_role(ROLE_STAFF) || user.is_admin()) {
        debug!(staff_id = %user.id, "Token without staff role");
        return Err(AuthError::InsufficientRole);
    }
    Ok(user)
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidToken)?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        Ok(authenticate_staff(&state.config.jwt_secret, token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "a_very_long_staff_token_signing_secret_value";

    #[test]
    fn staff_and_admin_tokens_are_accepted() {
        let id = Uuid::new_v4();
        let token = issue_token(SECRET, id, &[ROLE_STAFF], ChronoDuration::minutes(5)).unwrap();
        assert_eq!(authenticate_staff(SECRET, &token).unwrap().id, id);

        let admin = issue_token(SECRET, id, &[ROLE_ADMIN], ChronoDuration::minutes(5)).unwrap();
        assert!(authenticate_staff(SECRET, &admin).unwrap().is_admin());
    }

    #[test]
    fn buyer_token_is_forbidden() {
        let token =
            issue_token(SECRET, Uuid::new_v4(), &["buyer"], ChronoDuration::minutes(5)).unwrap();
        assert_matches!(
            authenticate_staff(SECRET, &token),
            Err(AuthError::InsufficientRole)
        );
        assert_matches!(
            ServiceError::from(AuthError::InsufficientRole),
            ServiceError::Forbidden(_)
        );
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let id = Uuid::new_v4();
        let token = issue_token(SECRET, id, &[ROLE_STAFF], ChronoDuration::minutes(5)).unwrap();
        assert_matches!(
            authenticate_staff("another_secret_that_is_long_enough_!!", &token),
            Err(AuthError::InvalidToken)
        );

        let expired = issue_token(SECRET, id, &[ROLE_STAFF], ChronoDuration::hours(-2)).unwrap();
        assert_matches!(
            authenticate_staff(SECRET, &expired),
            Err(AuthError::TokenExpired)
        );
    }
}
