use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use garimpo_security::InputValidator;

use crate::error::ApiError;

/// Header carrying the authenticated user id, set by the fronting auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;
        InputValidator::identifier(raw, "user id")
            .map(Caller)
            .map_err(|_| ApiError::unauthorized())
    }
}
