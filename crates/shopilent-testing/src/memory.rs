//! In-memory [`CommerceStore`] and [`OutboxStore`] with the same commit
//! semantics as the PostgreSQL store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopilent_core::domain::{Order, Payment, PaymentProvider};
use shopilent_core::{
    Changeset, CommerceStore, OutboxMessage, OutboxStatus, Result, ShopilentError, WebhookReceipt,
};
use shopilent_outbox::{OutboxStats, OutboxStore};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    receipts: HashMap<(String, String), WebhookReceipt>,
    /// Insertion order.
    outbox: Vec<OutboxMessage>,
}

impl State {
    fn check(&self, changes: &Changeset) -> Result<()> {
        if let Some(receipt) = &changes.receipt {
            let key = (receipt.provider.clone(), receipt.event_id.clone());
            if self.receipts.contains_key(&key) {
                return Err(ShopilentError::DuplicateEvent(format!(
                    "{}/{}",
                    receipt.provider, receipt.event_id
                )));
            }
        }
        for order in &changes.orders {
            let stored = self.orders.get(&order.id).map(|o| o.version);
            match (order.version, stored) {
                (0, None) => {}
                (expected, Some(current)) if expected == current => {}
                (expected, _) => return Err(ShopilentError::concurrency("order", order.id, expected)),
            }
        }
        for payment in &changes.payments {
            let stored = self.payments.get(&payment.id).map(|p| p.version);
            match (payment.version, stored) {
                (0, None) => {
                    let taken = self.payments.values().any(|p| {
                        p.provider == payment.provider
                            && p.external_reference == payment.external_reference
                    });
                    if taken {
                        return Err(ShopilentError::Conflict(format!(
                            "payment reference {} is already registered",
                            payment.external_reference
                        )));
                    }
                }
                (expected, Some(current)) if expected == current => {}
                (expected, _) => {
                    return Err(ShopilentError::concurrency("payment", payment.id, expected))
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: Changeset) {
        if let Some(receipt) = changes.receipt {
            let key = (receipt.provider.clone(), receipt.event_id.clone());
            self.receipts.insert(key, receipt);
        }
        for mut order in changes.orders {
            order.version += 1;
            self.orders.insert(order.id, order);
        }
        for mut payment in changes.payments {
            payment.version += 1;
            self.payments.insert(payment.id, payment);
        }
        self.outbox.extend(changes.outbox);
    }

    /// A pending message still leased to `worker_id`.
    fn leased_message(&mut self, id: Uuid, worker_id: &str) -> Option<&mut OutboxMessage> {
        self.outbox.iter_mut().find(|m| {
            m.id == id && m.status == OutboxStatus::Pending && m.locked_by.as_deref() == Some(worker_id)
        })
    }
}

/// Thread-safe store for tests. Commits are validated in full before
/// anything is applied, so a failed commit leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    injected_conflicts: AtomicUsize,
    commits: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a concurrency conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    pub async fn outbox_events(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .map(|m| m.event_type.clone())
            .collect()
    }

    pub async fn receipts(&self) -> Vec<WebhookReceipt> {
        let mut receipts: Vec<_> = self.state.read().await.receipts.values().cloned().collect();
        receipts.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        receipts
    }

    /// Insert or overwrite an outbox message directly, bypassing commit.
    pub async fn put_message(&self, message: OutboxMessage) {
        let mut state = self.state.write().await;
        state.outbox.retain(|m| m.id != message.id);
        state.outbox.push(message);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CommerceStore for InMemoryStore {
    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.provider == provider && p.external_reference == reference)
            .cloned())
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let mut payments: Vec<_> = self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn webhook_receipt(&self, provider: &str, event_id: &str) -> Result<Option<WebhookReceipt>> {
        Ok(self
            .state
            .read()
            .await
            .receipts
            .get(&(provider.to_string(), event_id.to_string()))
            .cloned())
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        if self.take_injected_conflict() {
            let id = changes
                .orders
                .first()
                .map(|o| o.id)
                .or_else(|| changes.payments.first().map(|p| p.id))
                .unwrap_or_default();
            return Err(ShopilentError::concurrency("order", id, 0));
        }

        let mut state = self.state.write().await;
        state.check(&changes)?;
        state.apply(changes);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let locked_until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| ShopilentError::failure(format!("lease out of range: {e}")))?;
        let mut state = self.state.write().await;

        let mut due: Vec<&mut OutboxMessage> = state
            .outbox
            .iter_mut()
            .filter(|m| m.is_claimable(now))
            .collect();
        due.sort_by_key(|m| (m.scheduled_at, m.created_at));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|m| {
                m.locked_by = Some(worker_id.to_string());
                m.locked_until = Some(locked_until);
                m.clone()
            })
            .collect())
    }

    async fn mark_processed(&self, id: Uuid, worker_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.leased_message(id, worker_id) else {
            return Ok(false);
        };
        message.status = OutboxStatus::Processed;
        message.processed_at = Some(at);
        message.error = None;
        message.locked_by = None;
        message.locked_until = None;
        Ok(true)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.leased_message(id, worker_id) else {
            return Ok(false);
        };
        message.retry_count = retry_count;
        message.error = Some(error.to_string());
        message.scheduled_at = next_attempt_at;
        message.locked_by = None;
        message.locked_until = None;
        Ok(true)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.leased_message(id, worker_id) else {
            return Ok(false);
        };
        message.status = OutboxStatus::Failed;
        message.retry_count = retry_count;
        message.error = Some(error.to_string());
        message.processed_at = Some(at);
        message.locked_by = None;
        message.locked_until = None;
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn failed(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let mut failed: Vec<_> = self
            .state
            .read()
            .await
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|m| m.created_at);
        failed.truncate(limit);
        Ok(failed)
    }

    async fn requeue(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id && m.status == OutboxStatus::Failed)
        else {
            return Ok(false);
        };
        message.status = OutboxStatus::Pending;
        message.retry_count = 0;
        message.scheduled_at = now;
        message.processed_at = None;
        message.locked_by = None;
        message.locked_until = None;
        Ok(true)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.outbox.len();
        state.outbox.retain(|m| {
            !(m.status == OutboxStatus::Processed
                && m.processed_at.is_some_and(|at| at < older_than))
        });
        Ok((before - state.outbox.len()) as u64)
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let state = self.state.read().await;
        let mut stats = OutboxStats::default();
        for message in &state.outbox {
            match message.status {
                OutboxStatus::Pending => {
                    stats.pending += 1;
                    if message.retry_count > 0 {
                        stats.retrying += 1;
                    }
                }
                OutboxStatus::Processed => stats.processed += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
