//! HTTP surface and process wiring for Shopilent.
//!
//! [`assemble`] builds the order service, the webhook processor and the
//! outbox worker over any store implementing both
//! [`CommerceStore`](shopilent_core::CommerceStore) and
//! [`OutboxStore`](shopilent_outbox::OutboxStore); [`router`] exposes them
//! over axum. The `shopilent` binary runs both against PostgreSQL.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Settings;
pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{assemble, AppState, Runtime};
