//! Persistence port for orders, payments and webhook receipts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Order, Payment, PaymentProvider};
use crate::error::Result;
use crate::outbox::OutboxMessage;

/// Proof that a provider event was handled. `(provider, event_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub outcome: String,
    pub received_at: DateTime<Utc>,
}

/// Everything one business operation writes, committed atomically.
///
/// Aggregates are written with an optimistic version check: `version == 0`
/// inserts, anything else updates the row only if the stored version still
/// matches. Their buffered domain events become outbox messages.
#[derive(Debug, Default, Clone)]
pub struct Changeset {
    pub orders: Vec<Order>,
    pub payments: Vec<Payment>,
    pub outbox: Vec<OutboxMessage>,
    pub receipt: Option<WebhookReceipt>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_order(&mut self, order: &mut Order, now: DateTime<Utc>) -> Result<()> {
        for event in order.take_events() {
            self.outbox.push(OutboxMessage::from_event(&event, now)?);
        }
        self.orders.push(order.clone());
        Ok(())
    }

    pub fn track_payment(&mut self, payment: &mut Payment, now: DateTime<Utc>) -> Result<()> {
        for event in payment.take_events() {
            self.outbox.push(OutboxMessage::from_event(&event, now)?);
        }
        self.payments.push(payment.clone());
        Ok(())
    }

    pub fn record_receipt(&mut self, receipt: WebhookReceipt) {
        self.receipt = Some(receipt);
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.payments.is_empty()
            && self.outbox.is_empty()
            && self.receipt.is_none()
    }
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn order(&self, id: Uuid) -> Result<Option<Order>>;

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>>;

    async fn payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>>;

    /// Payments for an order, newest first.
    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>>;

    async fn webhook_receipt(&self, provider: &str, event_id: &str) -> Result<Option<WebhookReceipt>>;

    /// Apply a changeset in one transaction.
    ///
    /// Fails with `ConcurrencyConflict` when an aggregate's version moved and
    /// with `DuplicateEvent` when the receipt already exists. Nothing is
    /// written in either case.
    async fn commit(&self, changes: Changeset) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderItem;

    #[test]
    fn tracking_drains_aggregate_events_into_outbox() {
        let now = Utc::now();
        let mut order = Order::new(
            Uuid::new_v4(),
            vec![OrderItem {
                product_id: Uuid::new_v4(),
                name: "Lamp".into(),
                quantity: 1,
                unit_price: 900,
            }],
            "EUR",
            now,
        )
        .unwrap();

        let mut changes = Changeset::new();
        assert!(changes.is_empty());
        changes.track_order(&mut order, now).unwrap();

        assert!(order.pending_events().is_empty());
        assert_eq!(changes.orders.len(), 1);
        assert_eq!(changes.outbox.len(), 1);
        assert_eq!(changes.outbox[0].event_type, "order.created");
        assert_eq!(changes.outbox[0].aggregate_id, order.id);
    }
}
