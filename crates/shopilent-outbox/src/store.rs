use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shopilent_core::{OutboxMessage, Result};
use uuid::Uuid;

/// Outbox queue health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub processed: i64,
    pub failed: i64,
    /// Pending messages that have failed at least once.
    pub retrying: i64,
}

/// Storage for outbox messages.
///
/// Claiming stamps a lease on the returned rows and returns immediately, so
/// no lock is held while the worker dispatches. A crashed worker's lease
/// simply expires and the message becomes claimable again.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` due messages, oldest schedule first.
    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>>;

    /// The `mark_*` calls only touch a pending message still leased to
    /// `worker_id`. They return false when the lease was lost to another
    /// worker, leaving the row as that worker left it.
    async fn mark_processed(&self, id: Uuid, worker_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Record a failed attempt and reschedule.
    async fn mark_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Retries exhausted. The message stays queryable but is never claimed.
    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>>;

    /// Permanently failed messages, oldest first.
    async fn failed(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Put a failed message back in the queue with a fresh retry budget.
    /// Returns false when the message does not exist or is not failed.
    async fn requeue(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Delete processed messages older than `older_than`.
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64>;

    async fn stats(&self) -> Result<OutboxStats>;
}
