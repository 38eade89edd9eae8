//! In-process event bus fed by the outbox drain.
//!
//! Handlers subscribe to an event type, or to every type with
//! [`EventBus::subscribe_all`]. Delivery is at-least-once: a message is only
//! considered delivered when every matching handler succeeded, and a failed
//! message is redelivered to all of them. Handlers must be idempotent.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::DomainEvent;
use crate::outbox::OutboxMessage;

const ALL_EVENTS: &str = "*";

/// What a handler receives for one delivery attempt.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub message_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    /// 1 for the first delivery.
    pub attempt: i32,
}

impl EventEnvelope {
    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Decode the payload as a [`DomainEvent`], if it is one.
    pub fn domain_event(&self) -> Option<DomainEvent> {
        self.decode().ok()
    }
}

impl From<&OutboxMessage> for EventEnvelope {
    fn from(message: &OutboxMessage) -> Self {
        Self {
            message_id: message.id,
            event_type: message.event_type.clone(),
            aggregate_type: message.aggregate_type.clone(),
            aggregate_id: message.aggregate_id,
            payload: message.payload.clone(),
            occurred_at: message.created_at,
            attempt: message.retry_count + 1,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs and dispatch errors.
    fn name(&self) -> &str;

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe(.failures))]
pub struct DispatchError {
    pub failures: Vec<HandlerFailure>,
}

fn describe(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.handler, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

type Handlers = SmallVec<[Arc<dyn EventHandler>; 4]>;

#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<String, Handlers>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        f.debug_struct("EventBus").field("subscriptions", &keys).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        self.subscribe(ALL_EVENTS, handler);
    }

    /// Handlers that would receive `event_type`, specific subscribers first.
    pub fn handlers_for(&self, event_type: &str) -> Handlers {
        let mut matched = Handlers::new();
        if let Some(specific) = self.handlers.get(event_type) {
            matched.extend(specific.iter().cloned());
        }
        if event_type != ALL_EVENTS {
            if let Some(all) = self.handlers.get(ALL_EVENTS) {
                matched.extend(all.iter().cloned());
            }
        }
        matched
    }

    /// Deliver one envelope to every matching handler.
    ///
    /// Handlers run concurrently. Returns how many handlers received it.
    /// The DashMap guards are released before any handler is awaited.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<usize, DispatchError> {
        let handlers = self.handlers_for(&envelope.event_type);
        if handlers.is_empty() {
            tracing::debug!(event_type = %envelope.event_type, "no subscribers for event");
            return Ok(0);
        }

        let results = join_all(handlers.iter().map(|handler| async move {
            let outcome = handler.handle(envelope).await;
            (handler.name().to_string(), outcome)
        }))
        .await;

        let failures: Vec<HandlerFailure> = results
            .into_iter()
            .filter_map(|(handler, outcome)| {
                outcome.err().map(|err| HandlerFailure {
                    handler,
                    error: format!("{err:#}"),
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(handlers.len())
        } else {
            Err(DispatchError { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Counter {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EventHandler for Counter {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("downstream unavailable");
            }
            Ok(())
        }
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        let message = OutboxMessage::new(
            event_type,
            "order",
            Uuid::new_v4(),
            serde_json::json!({}),
            Utc::now(),
        );
        EventEnvelope::from(&message)
    }

    #[tokio::test]
    async fn routes_by_type_and_wildcard() {
        let bus = EventBus::new();
        let paid = Counter::new("paid", false);
        let audit = Counter::new("audit", false);
        bus.subscribe("order.paid", paid.clone());
        bus.subscribe_all(audit.clone());

        assert_eq!(bus.publish(&envelope("order.paid")).await.unwrap(), 2);
        assert_eq!(bus.publish(&envelope("order.created")).await.unwrap(), 1);

        assert_eq!(paid.calls.load(Ordering::SeqCst), 1);
        assert_eq!(audit.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn any_failing_handler_fails_the_dispatch() {
        let bus = EventBus::new();
        let ok = Counter::new("ok", false);
        let broken = Counter::new("broken", true);
        bus.subscribe("order.paid", ok.clone());
        bus.subscribe("order.paid", broken.clone());

        let err = bus.publish(&envelope("order.paid")).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].handler, "broken");
        assert!(err.to_string().contains("downstream unavailable"));
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribed_events_are_delivered_to_nobody() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&envelope("payment.created")).await.unwrap(), 0);
    }

    #[test]
    fn envelope_attempt_counts_from_one() {
        let mut message = OutboxMessage::new("x", "order", Uuid::new_v4(), serde_json::json!({}), Utc::now());
        message.retry_count = 2;
        assert_eq!(EventEnvelope::from(&message).attempt, 3);
    }
}
