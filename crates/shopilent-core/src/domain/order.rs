//! Order aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{DomainEvent, PendingEvents};
use super::status::{OrderStatus, PaymentStatus, Transition};
use crate::error::{Result, ShopilentError};

/// A purchased line. Prices are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

/// Stores rebuild persisted rows with a struct literal and `PendingEvents::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub currency: String,
    pub total: i64,
    pub refunded_amount: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Optimistic concurrency token; 0 means never persisted.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub pending: PendingEvents,
}

impl Order {
    pub fn new(
        user_id: Uuid,
        items: Vec<OrderItem>,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let currency = currency.into().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ShopilentError::validation(format!(
                "currency '{currency}' is not an ISO 4217 code"
            )));
        }
        if items.is_empty() {
            return Err(ShopilentError::validation("order must contain at least one item"));
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(ShopilentError::validation(format!(
                    "item '{}' has zero quantity",
                    item.name
                )));
            }
            if item.unit_price < 0 {
                return Err(ShopilentError::validation(format!(
                    "item '{}' has a negative price",
                    item.name
                )));
            }
        }

        let total = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.line_total()))
            .ok_or_else(|| ShopilentError::validation("order total overflows"))?;

        let id = Uuid::new_v4();
        let mut order = Self {
            id,
            user_id,
            items,
            currency: currency.clone(),
            total,
            refunded_amount: 0,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
            pending: PendingEvents::default(),
        };
        order.record(DomainEvent::OrderCreated {
            order_id: id,
            user_id,
            total,
            currency,
        });
        Ok(order)
    }

    fn record(&mut self, event: DomainEvent) {
        self.pending.push(event);
    }

    /// Domain events raised since the last commit.
    pub fn pending_events(&self) -> &[DomainEvent] {
        self.pending.as_slice()
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        self.pending.take()
    }

    /// Called after the store accepted this version.
    pub fn mark_committed(&mut self) {
        self.version += 1;
    }

    pub fn update_status(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Transition {
        if self.status == next {
            return Transition::Unchanged;
        }
        if !self.status.can_transition_to(next) {
            return Transition::Rejected;
        }
        let from = self.status;
        self.status = next;
        self.updated_at = now;
        self.record(DomainEvent::OrderStatusChanged {
            order_id: self.id,
            from,
            to: next,
        });
        Transition::Applied
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Transition {
        if self.status == OrderStatus::Cancelled {
            return Transition::Unchanged;
        }
        if !self.status.can_cancel() {
            return Transition::Rejected;
        }
        let transition = self.update_status(OrderStatus::Cancelled, now);
        if transition.is_applied() {
            self.record(DomainEvent::OrderCancelled { order_id: self.id });
        }
        transition
    }

    /// Payment captured. A pending order moves to processing.
    ///
    /// The order's payment status summarises every payment attempt, so a
    /// capture lands whatever earlier attempts failed or were cancelled.
    pub fn mark_as_paid(&mut self, payment_id: Option<Uuid>, now: DateTime<Utc>) -> Transition {
        if self.payment_status.is_captured() {
            return Transition::Unchanged;
        }
        self.payment_status = PaymentStatus::Succeeded;
        self.updated_at = now;
        self.record(DomainEvent::OrderPaid {
            order_id: self.id,
            payment_id,
        });
        if self.status == OrderStatus::Pending {
            self.update_status(OrderStatus::Processing, now);
        }
        Transition::Applied
    }

    pub fn mark_payment_processing(&mut self, now: DateTime<Utc>) -> Transition {
        self.move_payment_status(PaymentStatus::Processing, now)
    }

    pub fn mark_payment_failed(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Transition {
        let transition = self.move_payment_status(PaymentStatus::Failed, now);
        if transition.is_applied() {
            self.record(DomainEvent::OrderPaymentFailed {
                order_id: self.id,
                reason,
            });
        }
        transition
    }

    pub fn mark_payment_cancelled(&mut self, now: DateTime<Utc>) -> Transition {
        self.move_payment_status(PaymentStatus::Cancelled, now)
    }

    /// Non-capture outcome of the latest attempt. Once money is captured
    /// only refunds move the order's payment status.
    fn move_payment_status(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Transition {
        if self.payment_status == next {
            return Transition::Unchanged;
        }
        if self.payment_status.is_captured() {
            return Transition::Rejected;
        }
        self.payment_status = next;
        self.updated_at = now;
        Transition::Applied
    }

    /// Record the cumulative refunded amount reported for this order.
    ///
    /// Amounts at or below what is already recorded are no-ops, so replays
    /// and out-of-order partial refunds cannot double-apply.
    pub fn record_refund(&mut self, total_refunded: i64, now: DateTime<Utc>) -> Transition {
        if !self.payment_status.is_captured() || total_refunded > self.total {
            return Transition::Rejected;
        }
        if total_refunded <= self.refunded_amount {
            return Transition::Unchanged;
        }
        let fully_refunded = total_refunded == self.total;
        self.refunded_amount = total_refunded;
        self.payment_status = if fully_refunded {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.updated_at = now;
        self.record(DomainEvent::OrderRefunded {
            order_id: self.id,
            amount_refunded: total_refunded,
            fully_refunded,
        });
        if fully_refunded && self.status.can_transition_to(OrderStatus::Refunded) {
            self.update_status(OrderStatus::Refunded, now);
        }
        Transition::Applied
    }
}
