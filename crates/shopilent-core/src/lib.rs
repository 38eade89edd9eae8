//! # Shopilent core
//!
//! Domain model and ports for the order/payment side of the Shopilent
//! backend, built around a transactional outbox.
//!
//! ## Architecture
//!
//! ```text
//! HTTP / webhook request
//!     │
//!     ▼ mutate aggregate (Order, Payment)
//! Changeset ── aggregates (version checked)
//!     │        outbox messages (from buffered DomainEvents)
//!     │        webhook receipt (idempotency key)
//!     ▼
//! CommerceStore::commit()  ── one transaction
//!     ┊
//!     ┊ later, shopilent-outbox worker
//!     ▼
//! EventBus::publish() ──► EventHandler (cache invalidation, audit, ...)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Events commit with state** - an aggregate change and the outbox
//!    messages it raised are written together or not at all
//! 2. **Optimistic concurrency** - every aggregate write checks the version
//!    it was loaded at; of two concurrent writers one sees a conflict
//! 3. **Forward-only payments** - payment status never moves backwards and
//!    re-applying a transition is a no-op
//! 4. **At-least-once delivery** - bus handlers may see a message twice

mod auth;
mod bus;
mod cache;
mod error;
mod outbox;
mod service;
mod store;

pub mod domain;

pub use auth::{Principal, Role};
pub use bus::{DispatchError, EventBus, EventEnvelope, EventHandler, HandlerFailure};
pub use cache::{EventAuditLog, OrderCache, OrderCacheInvalidator, QueryCache};
pub use error::{ErrorKind, Result, ShopilentError};
pub use outbox::{OutboxMessage, OutboxStatus};
pub use service::OrderService;
pub use store::{Changeset, CommerceStore, WebhookReceipt};

// Re-export commonly used external types
pub use async_trait::async_trait;
