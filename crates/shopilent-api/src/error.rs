use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shopilent_core::ShopilentError;

/// Maps domain errors onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub ShopilentError);

impl From<ShopilentError> for ApiError {
    fn from(err: ShopilentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = ?err, "request failed");
        }
        let body = json!({
            "error": err.kind().as_str(),
            "message": err.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_hide_details() {
        let response = ApiError(ShopilentError::failure("connection refused")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError(ShopilentError::not_found("order", "o-1")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError(ShopilentError::concurrency("order", "o-1", 2)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
