//! Custom Axum extractors for request authentication.
//!
//! - `AdminAuth`: checks `Authorization: Bearer {token}` against the admin
//!   token (used by the subscription API).

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Proof that the request carried the admin token.
pub struct AdminAuth;

#[derive(Debug, thiserror::Error)]
pub enum AdminAuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("invalid Authorization header format")]
    InvalidHeader,
    #[error("invalid admin token")]
    InvalidToken,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminAuthError::MissingHeader => {
                (StatusCode::UNAUTHORIZED, "missing Authorization header")
            }
            AdminAuthError::InvalidHeader => (
                StatusCode::BAD_REQUEST,
                "invalid Authorization header format",
            ),
            AdminAuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid admin token"),
        };
        (status, message).into_response()
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AdminAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AdminAuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AdminAuthError::InvalidHeader)?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(AdminAuthError::InvalidHeader)?
            .trim();

        let admin = state.admin.read().await;
        if !admin.verify(token) {
            drop(admin);
            tracing::warn!("Rejected admin API request with a bad token");
            return Err(AdminAuthError::InvalidToken);
        }

        drop(admin);
        Ok(AdminAuth)
    }
}
