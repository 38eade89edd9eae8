//! Route table.
//!
//! - `GET  /health`
//! - `POST /api/v1/orders`, `GET /api/v1/orders/:id`
//! - `PUT  /api/v1/orders/:id/status`, `POST /api/v1/orders/:id/cancel`
//! - `GET  /api/v1/orders/:id/payments`, `POST /api/v1/payments`
//! - `POST /api/v1/webhooks/:provider`
//! - `GET  /api/v1/admin/outbox/failed`, `GET /api/v1/admin/outbox/stats`
//! - `POST /api/v1/admin/outbox/:id/retry`

mod health;
mod orders;
mod outbox;
mod payments;
mod webhooks;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/orders", post(orders::create))
        .route("/orders/:id", get(orders::get))
        .route("/orders/:id/status", put(orders::update_status))
        .route("/orders/:id/cancel", post(orders::cancel))
        .route("/orders/:id/payments", get(payments::list_for_order))
        .route("/payments", post(payments::create))
        .route("/webhooks/:provider", post(webhooks::receive))
        .route("/admin/outbox/failed", get(outbox::failed))
        .route("/admin/outbox/stats", get(outbox::stats))
        .route("/admin/outbox/:id/retry", post(outbox::retry));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .with_state(state)
}
