//! Payment aggregate.
//!
//! A payment mirrors one provider-side intent. Its state only moves forward
//! (see [`PaymentStatus::can_transition_to`]) and every mutator reports a
//! [`Transition`] instead of failing, so the webhook pipeline can treat
//! replays and stale deliveries as no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{DomainEvent, PendingEvents};
use super::status::{PaymentProvider, PaymentStatus, Transition};
use crate::error::{Result, ShopilentError};

/// Stores rebuild persisted rows with a struct literal and `PendingEvents::default()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: PaymentProvider,
    /// Provider-side identifier (e.g. a payment intent id).
    pub external_reference: String,
    pub amount: i64,
    pub refunded_amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub version: i64,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub pending: PendingEvents,
}

impl Payment {
    pub fn new(
        order_id: Uuid,
        provider: PaymentProvider,
        external_reference: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let external_reference = external_reference.into();
        if external_reference.trim().is_empty() {
            return Err(ShopilentError::validation("external reference is required"));
        }
        if amount <= 0 {
            return Err(ShopilentError::validation("payment amount must be positive"));
        }

        let id = Uuid::new_v4();
        let mut payment = Self {
            id,
            order_id,
            provider,
            external_reference,
            amount,
            refunded_amount: 0,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            error_message: None,
            version: 0,
            processed_at: None,
            created_at: now,
            updated_at: now,
            pending: PendingEvents::default(),
        };
        payment.record(DomainEvent::PaymentCreated {
            payment_id: id,
            order_id,
            provider,
            amount,
        });
        Ok(payment)
    }

    fn record(&mut self, event: DomainEvent) {
        self.pending.push(event);
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        self.pending.as_slice()
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        self.pending.take()
    }

    pub fn mark_committed(&mut self) {
        self.version += 1;
    }

    fn move_to(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Transition {
        if self.status == next {
            return Transition::Unchanged;
        }
        if !self.status.can_transition_to(next) {
            return Transition::Rejected;
        }
        let from = self.status;
        self.status = next;
        self.updated_at = now;
        self.record(DomainEvent::PaymentStatusChanged {
            payment_id: self.id,
            order_id: self.order_id,
            from,
            to: next,
        });
        Transition::Applied
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Transition {
        self.move_to(PaymentStatus::Processing, now)
    }

    pub fn mark_succeeded(&mut self, transaction_id: Option<String>, now: DateTime<Utc>) -> Transition {
        if self.status.is_captured() {
            return Transition::Unchanged;
        }
        let transition = self.move_to(PaymentStatus::Succeeded, now);
        if transition.is_applied() {
            self.transaction_id = transaction_id.clone().or(self.transaction_id.take());
            self.error_message = None;
            self.processed_at = Some(now);
            self.record(DomainEvent::PaymentSucceeded {
                payment_id: self.id,
                order_id: self.order_id,
                transaction_id,
            });
        }
        transition
    }

    pub fn mark_failed(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Transition {
        let transition = self.move_to(PaymentStatus::Failed, now);
        if transition.is_applied() {
            self.error_message = reason.clone();
            self.processed_at = Some(now);
            self.record(DomainEvent::PaymentFailed {
                payment_id: self.id,
                order_id: self.order_id,
                reason,
            });
        }
        transition
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Transition {
        self.move_to(PaymentStatus::Cancelled, now)
    }

    /// Apply the provider's cumulative refunded amount.
    pub fn record_refund(&mut self, total_refunded: i64, now: DateTime<Utc>) -> Transition {
        if total_refunded > self.amount || !self.status.is_captured() {
            return Transition::Rejected;
        }
        if total_refunded <= self.refunded_amount {
            return Transition::Unchanged;
        }
        let next = if total_refunded == self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        // A second partial refund keeps the status but still moves money.
        if next != self.status {
            self.move_to(next, now);
        }
        let delta = total_refunded - self.refunded_amount;
        self.refunded_amount = total_refunded;
        self.updated_at = now;
        self.record(DomainEvent::PaymentRefunded {
            payment_id: self.id,
            order_id: self.order_id,
            amount: delta,
            total_refunded,
        });
        Transition::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        let mut payment = Payment::new(
            Uuid::new_v4(),
            PaymentProvider::Stripe,
            "pi_123",
            4_000,
            "USD",
            Utc::now(),
        )
        .unwrap();
        payment.take_events();
        payment
    }

    #[test]
    fn requires_reference_and_positive_amount() {
        let order = Uuid::new_v4();
        let now = Utc::now();
        assert!(Payment::new(order, PaymentProvider::Stripe, " ", 10, "USD", now).is_err());
        assert!(Payment::new(order, PaymentProvider::Stripe, "pi_1", 0, "USD", now).is_err());
    }

    #[test]
    fn success_is_idempotent() {
        let mut payment = payment();
        assert_eq!(
            payment.mark_succeeded(Some("ch_1".into()), Utc::now()),
            Transition::Applied
        );
        assert_eq!(payment.transaction_id.as_deref(), Some("ch_1"));
        payment.take_events();

        assert_eq!(
            payment.mark_succeeded(Some("ch_1".into()), Utc::now()),
            Transition::Unchanged
        );
        assert!(payment.pending_events().is_empty());
    }

    #[test]
    fn success_after_failure_is_allowed_but_not_the_reverse() {
        let mut payment = payment();
        assert!(payment.mark_failed(Some("card_declined".into()), Utc::now()).is_applied());
        assert!(payment.mark_succeeded(None, Utc::now()).is_applied());
        assert_eq!(payment.error_message, None);
        assert_eq!(payment.mark_failed(None, Utc::now()), Transition::Rejected);
        assert_eq!(payment.status, PaymentStatus::Succeeded);
    }

    #[test]
    fn partial_refunds_accumulate_without_double_apply() {
        let mut payment = payment();
        payment.mark_succeeded(None, Utc::now());
        payment.take_events();

        assert!(payment.record_refund(1_000, Utc::now()).is_applied());
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
        assert!(payment.record_refund(2_500, Utc::now()).is_applied());
        assert_eq!(payment.refunded_amount, 2_500);

        let refunds: Vec<_> = payment
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                DomainEvent::PaymentRefunded { amount, .. } => Some(amount),
                _ => None,
            })
            .collect();
        assert_eq!(refunds, vec![1_000, 1_500]);

        assert_eq!(payment.record_refund(2_500, Utc::now()), Transition::Unchanged);
        assert!(payment.record_refund(4_000, Utc::now()).is_applied());
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.record_refund(4_000, Utc::now()), Transition::Unchanged);
    }

    #[test]
    fn refund_larger_than_amount_is_rejected() {
        let mut payment = payment();
        payment.mark_succeeded(None, Utc::now());
        assert_eq!(payment.record_refund(4_001, Utc::now()), Transition::Rejected);
        assert_eq!(payment.refunded_amount, 0);
    }
}
