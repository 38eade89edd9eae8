//! Domain events raised by the order and payment aggregates.
//!
//! Events are facts. Aggregates buffer them until the store commits the
//! state change, at which point they become outbox messages in the same
//! transaction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{OrderStatus, PaymentProvider, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: i64,
        currency: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled {
        order_id: Uuid,
    },
    OrderPaid {
        order_id: Uuid,
        payment_id: Option<Uuid>,
    },
    OrderPaymentFailed {
        order_id: Uuid,
        reason: Option<String>,
    },
    OrderRefunded {
        order_id: Uuid,
        amount_refunded: i64,
        fully_refunded: bool,
    },
    PaymentCreated {
        payment_id: Uuid,
        order_id: Uuid,
        provider: PaymentProvider,
        amount: i64,
    },
    PaymentStatusChanged {
        payment_id: Uuid,
        order_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    PaymentSucceeded {
        payment_id: Uuid,
        order_id: Uuid,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    },
    PaymentRefunded {
        payment_id: Uuid,
        order_id: Uuid,
        amount: i64,
        total_refunded: i64,
    },
}

/// Events an aggregate raised since its last commit.
///
/// Only the owning aggregate can add to it; stores rebuilding persisted
/// state start from an empty buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEvents(Vec<DomainEvent>);

impl PendingEvents {
    pub(crate) fn push(&mut self, event: DomainEvent) {
        self.0.push(event);
    }

    pub(crate) fn take(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.0)
    }

    pub fn as_slice(&self) -> &[DomainEvent] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl DomainEvent {
    /// Routing key used by the outbox and the event bus.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated { .. } => "order.created",
            DomainEvent::OrderStatusChanged { .. } => "order.status_changed",
            DomainEvent::OrderCancelled { .. } => "order.cancelled",
            DomainEvent::OrderPaid { .. } => "order.paid",
            DomainEvent::OrderPaymentFailed { .. } => "order.payment_failed",
            DomainEvent::OrderRefunded { .. } => "order.refunded",
            DomainEvent::PaymentCreated { .. } => "payment.created",
            DomainEvent::PaymentStatusChanged { .. } => "payment.status_changed",
            DomainEvent::PaymentSucceeded { .. } => "payment.succeeded",
            DomainEvent::PaymentFailed { .. } => "payment.failed",
            DomainEvent::PaymentRefunded { .. } => "payment.refunded",
        }
    }

    /// Aggregate type and id that raised the event.
    pub fn aggregate(&self) -> (&'static str, Uuid) {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::OrderStatusChanged { order_id, .. }
            | DomainEvent::OrderCancelled { order_id }
            | DomainEvent::OrderPaid { order_id, .. }
            | DomainEvent::OrderPaymentFailed { order_id, .. }
            | DomainEvent::OrderRefunded { order_id, .. } => ("order", *order_id),
            DomainEvent::PaymentCreated { payment_id, .. }
            | DomainEvent::PaymentStatusChanged { payment_id, .. }
            | DomainEvent::PaymentSucceeded { payment_id, .. }
            | DomainEvent::PaymentFailed { payment_id, .. }
            | DomainEvent::PaymentRefunded { payment_id, .. } => ("payment", *payment_id),
        }
    }

    /// Every event concerns exactly one order.
    pub fn order_id(&self) -> Uuid {
        match self {
            DomainEvent::OrderCreated { order_id, .. }
            | DomainEvent::OrderStatusChanged { order_id, .. }
            | DomainEvent::OrderCancelled { order_id }
            | DomainEvent::OrderPaid { order_id, .. }
            | DomainEvent::OrderPaymentFailed { order_id, .. }
            | DomainEvent::OrderRefunded { order_id, .. }
            | DomainEvent::PaymentCreated { order_id, .. }
            | DomainEvent::PaymentStatusChanged { order_id, .. }
            | DomainEvent::PaymentSucceeded { order_id, .. }
            | DomainEvent::PaymentFailed { order_id, .. }
            | DomainEvent::PaymentRefunded { order_id, .. } => *order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_type_tag() {
        let order_id = Uuid::new_v4();
        let event = DomainEvent::OrderPaid {
            order_id,
            payment_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_paid");
        assert_eq!(event.event_type(), "order.paid");
        assert_eq!(event.aggregate(), ("order", order_id));

        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn payment_events_point_back_at_their_order() {
        let order_id = Uuid::new_v4();
        let payment_id = Uuid::new_v4();
        let event = DomainEvent::PaymentRefunded {
            payment_id,
            order_id,
            amount: 500,
            total_refunded: 500,
        };
        assert_eq!(event.aggregate(), ("payment", payment_id));
        assert_eq!(event.order_id(), order_id);
    }
}
