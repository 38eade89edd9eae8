use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use shopilent_payments::WebhookOutcome;

use crate::error::ApiResult;
use crate::state::AppState;

/// The body is taken raw; the signature covers the exact bytes sent.
pub async fn receive(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    let signature = state
        .webhooks
        .signature_header(&provider)
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let outcome = state.webhooks.process(&provider, &body, signature).await?;
    tracing::info!(
        provider = %provider,
        event_id = %outcome.event_id(),
        outcome = outcome.as_str(),
        "webhook handled"
    );
    Ok(Json(outcome))
}
