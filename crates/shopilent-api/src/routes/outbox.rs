use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use shopilent_core::{OutboxMessage, ShopilentError};
use shopilent_outbox::OutboxStats;
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

const MAX_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn failed(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Query(query): Query<FailedQuery>,
) -> ApiResult<Json<Vec<OutboxMessage>>> {
    principal.require_admin()?;
    let limit = query.limit.clamp(1, MAX_PAGE);
    Ok(Json(state.outbox.failed(limit).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    Caller(principal): Caller,
) -> ApiResult<Json<OutboxStats>> {
    principal.require_admin()?;
    Ok(Json(state.outbox.stats().await?))
}

/// Give a failed message a fresh retry budget.
pub async fn retry(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    principal.require_admin()?;
    if !state.outbox.requeue(id, Utc::now()).await? {
        return Err(ShopilentError::not_found("failed outbox message", id).into());
    }
    tracing::info!(message_id = %id, user_id = %principal.user_id, "outbox message requeued");
    Ok(Json(json!({ "requeued": id })))
}
