use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use shopilent_core::domain::{Payment, PaymentProvider};
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePayment {
    pub order_id: Uuid,
    #[serde(default)]
    pub provider: PaymentProvider,
    /// Provider-side id, e.g. a Stripe payment intent.
    pub external_reference: String,
}

pub async fn create(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Json(body): Json<CreatePayment>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state
        .service
        .create_payment(&principal, body.order_id, body.provider, &body.external_reference)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_for_order(
    State(state): State<AppState>,
    Caller(principal): Caller,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(
        state.service.payments_for_order(&principal, order_id).await?,
    ))
}
