//! Read-through query cache and the outbox handler that keeps it fresh.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::bus::{EventEnvelope, EventHandler};
use crate::domain::{DomainEvent, Order};

/// TTL cache for query results.
pub struct QueryCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if entry.1.elapsed() < self.ttl {
                return Some(entry.0.clone());
            }
        }
        // The read guard must be gone before removing from the same shard.
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type OrderCache = QueryCache<Uuid, Order>;

/// Evicts cached orders whenever an order or payment event is delivered.
pub struct OrderCacheInvalidator {
    cache: Arc<OrderCache>,
}

impl OrderCacheInvalidator {
    pub fn new(cache: Arc<OrderCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler for OrderCacheInvalidator {
    fn name(&self) -> &str {
        "order-cache-invalidator"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let order_id = match envelope.domain_event() {
            Some(event) => event.order_id(),
            None if envelope.aggregate_type == "order" => envelope.aggregate_id,
            None => return Ok(()),
        };
        if self.cache.invalidate(&order_id) {
            tracing::debug!(%order_id, event_type = %envelope.event_type, "evicted cached order");
        }
        Ok(())
    }
}

/// Structured log line for every delivered event.
pub struct EventAuditLog;

#[async_trait]
impl EventHandler for EventAuditLog {
    fn name(&self) -> &str {
        "event-audit-log"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let order_id = envelope.domain_event().as_ref().map(DomainEvent::order_id);
        tracing::info!(
            message_id = %envelope.message_id,
            event_type = %envelope.event_type,
            aggregate_type = %envelope.aggregate_type,
            aggregate_id = %envelope.aggregate_id,
            order_id = ?order_id,
            attempt = envelope.attempt,
            "domain event delivered"
        );
        Ok(())
    }
}
