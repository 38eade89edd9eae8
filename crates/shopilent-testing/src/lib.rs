//! Test support for Shopilent.
//!
//! - [`InMemoryStore`]: both store ports with PostgreSQL-equivalent commit
//!   rules, plus conflict injection
//! - [`RecordingHandler`] / [`FailingHandler`]: bus handler doubles
//! - [`fixtures`]: principals, orders and signed Stripe payloads
//! - [`Harness`]: everything wired together
//!
//! ```rust,ignore
//! let h = Harness::new();
//! let (order, payment) = h.order_with_payment(&customer, "pi_1").await?;
//! let body = fixtures::payment_intent_event("evt_1", "payment_intent.succeeded", "pi_1", order.id);
//! h.deliver(&body).await?;
//! h.worker().drain().await?;
//! ```

pub mod fixtures;
mod handlers;
mod harness;
mod memory;

pub use handlers::{FailingHandler, RecordingHandler};
pub use harness::Harness;
pub use memory::InMemoryStore;
