//! # Shopilent outbox
//!
//! Drains outbox messages written by [`shopilent_core::CommerceStore::commit`]
//! into the in-process [`shopilent_core::EventBus`].
//!
//! # Delivery
//!
//! - Claims are lease-based: a batch is stamped with a lease and returned
//!   before any handler runs
//! - Completion is recorded only while the worker still holds the lease; a
//!   worker whose lease was taken over discards its result
//! - A failed dispatch increments the retry count and reschedules the message
//!   with exponential backoff ([`RetryPolicy`])
//! - After `max_retries` failures the message is marked failed, logged, and
//!   left for an operator to inspect or requeue
//! - Processed messages are deleted by the retention sweep; failed ones are
//!   never swept
//!
//! # Usage
//!
//! ```rust,ignore
//! use shopilent_outbox::{OutboxConfig, OutboxWorker};
//!
//! let worker = OutboxWorker::new(store, bus).with_config(OutboxConfig::default());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(worker.run(shutdown_rx));
//! ```

mod retry;
mod store;
mod worker;

pub use retry::{RetryDecision, RetryPolicy};
pub use store::{OutboxStats, OutboxStore};
pub use worker::{Delivery, DrainReport, OutboxConfig, OutboxWorker};
