//! # Shopilent Payments
//!
//! Inbound payment provider webhooks.
//!
//! ```text
//! POST /webhooks/{provider}
//!        │
//!        ▼
//!   WebhookVerifier ── HMAC-SHA256 over "{t}.{body}", ±tolerance
//!        │
//!        ▼
//!   WebhookParser ──── provider JSON → ProviderEvent
//!        │
//!        ▼
//!   WebhookProcessor ─ receipt check → transition → commit(aggregates + outbox + receipt)
//! ```
//!
//! Nothing is read or written before the signature checks out. A given
//! `(provider, event_id)` changes state at most once; redeliveries report
//! [`WebhookOutcome::Duplicate`].

mod provider;
mod signature;
mod webhook;

pub use provider::{ProviderEvent, StripeParser, WebhookAction, WebhookParser};
pub use signature::{SignatureError, SignatureHeader, WebhookVerifier};
pub use webhook::{WebhookOutcome, WebhookProcessor, WebhookSettings};
