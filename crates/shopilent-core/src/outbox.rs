//! Outbox message model.
//!
//! Messages are written in the same transaction as the aggregate change
//! that produced them and drained later by `shopilent-outbox`.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DomainEvent;
use crate::error::{Result, ShopilentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processed,
    /// Retries exhausted; waits for an operator.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = ShopilentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(ShopilentError::validation(format!(
                "unknown outbox status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the next delivery attempt may start.
    pub scheduled_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: now,
            scheduled_at: now,
            processed_at: None,
            locked_by: None,
            locked_until: None,
        }
    }

    pub fn from_event(event: &DomainEvent, now: DateTime<Utc>) -> Result<Self> {
        let (aggregate_type, aggregate_id) = event.aggregate();
        let payload = serde_json::to_value(event)
            .with_context(|| format!("serializing {} payload", event.event_type()))?;
        Ok(Self::new(
            event.event_type(),
            aggregate_type,
            aggregate_id,
            payload,
            now,
        ))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("decoding outbox message {} ({})", self.id, self.event_type))
            .map_err(ShopilentError::from)
    }

    /// Whether a worker may claim this message at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending
            && self.scheduled_at <= now
            && self.locked_until.map_or(true, |until| until <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn built_from_domain_event() {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let event = DomainEvent::OrderCancelled { order_id };
        let message = OutboxMessage::from_event(&event, now).unwrap();

        assert_eq!(message.event_type, "order.cancelled");
        assert_eq!(message.aggregate_type, "order");
        assert_eq!(message.aggregate_id, order_id);
        assert_eq!(message.status, OutboxStatus::Pending);
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.decode::<DomainEvent>().unwrap(), event);
    }

    #[test]
    fn claimability_respects_schedule_and_lease() {
        let now = Utc::now();
        let mut message = OutboxMessage::new("x", "order", Uuid::new_v4(), serde_json::json!({}), now);
        assert!(message.is_claimable(now));

        message.scheduled_at = now + Duration::seconds(30);
        assert!(!message.is_claimable(now));

        message.scheduled_at = now;
        message.locked_until = Some(now + Duration::seconds(30));
        assert!(!message.is_claimable(now));
        assert!(message.is_claimable(now + Duration::seconds(31)));

        message.status = OutboxStatus::Failed;
        assert!(!message.is_claimable(now + Duration::days(1)));
    }
}
