use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use shopilent_core::domain::{Order, OrderItem, OrderStatus};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrder {
    pub items: Vec<OrderItem>,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatus {
    pub status: OrderStatus,
    /// Optimistic concurrency guard; omitted means "whatever is current".
    #[serde(default)]
    pub expected_version: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Json(body): Json<CreateOrder>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = state
        .service
        .create_order(&principal, body.items, &body.currency)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.service.get_order(&principal, id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatus>,
) -> ApiResult<Json<Order>> {
    let order = state
        .service
        .update_order_status(&principal, id, body.status, body.expected_version)
        .await?;
    Ok(Json(order))
}

pub async fn cancel(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.service.cancel_order(&principal, id).await?))
}
