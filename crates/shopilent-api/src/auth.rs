use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use shopilent_core::{Principal, ShopilentError};

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated caller, resolved from an `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| ShopilentError::Unauthorized("missing bearer token".into()))?;

        state
            .principal(token)
            .cloned()
            .map(Caller)
            .ok_or_else(|| ShopilentError::Unauthorized("unknown token".into()).into())
    }
}
