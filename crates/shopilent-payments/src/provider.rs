//! Provider payload parsing into a normalized [`ProviderEvent`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shopilent_core::domain::PaymentProvider;
use shopilent_core::{Result, ShopilentError};
use uuid::Uuid;

/// State change a provider event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    PaymentSucceeded,
    PaymentFailed,
    PaymentProcessing,
    PaymentCancelled,
    /// `amount_refunded` is the cumulative total, not a delta.
    Refunded { amount_refunded: i64 },
    Ignored,
}

impl WebhookAction {
    pub fn is_ignored(&self) -> bool {
        matches!(self, WebhookAction::Ignored)
    }
}

/// Provider event reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub event_id: String,
    pub event_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub order_id: Option<Uuid>,
    pub amount: Option<i64>,
    pub amount_refunded: Option<i64>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub action: WebhookAction,
}

/// Turns a verified raw body into a [`ProviderEvent`].
pub trait WebhookParser: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Header that carries the signature for this provider.
    fn signature_header(&self) -> &'static str;

    fn parse(&self, payload: &[u8]) -> Result<ProviderEvent>;
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeObject,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    amount_refunded: Option<i64>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    latest_charge: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<StripeErrorDetail>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StripeParser;

impl WebhookParser for StripeParser {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    fn signature_header(&self) -> &'static str {
        "Stripe-Signature"
    }

    fn parse(&self, payload: &[u8]) -> Result<ProviderEvent> {
        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| ShopilentError::validation(format!("invalid stripe payload: {e}")))?;
        let object = event.data.object;

        let order_id = object
            .metadata
            .get("order_id")
            .and_then(|raw| Uuid::parse_str(raw).ok());
        let created_at = event
            .created
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        // Intents are referenced by their own id; charges point back to one.
        let (external_reference, transaction_id) = if event.event_type.starts_with("payment_intent.") {
            (Some(object.id.clone()), object.latest_charge.clone())
        } else if event.event_type.starts_with("charge.") {
            (object.payment_intent.clone(), Some(object.id.clone()))
        } else {
            (None, None)
        };

        let failure_reason = object
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
            .or_else(|| object.failure_message.clone())
            .or_else(|| object.cancellation_reason.clone());

        let action = match event.event_type.as_str() {
            "payment_intent.succeeded" | "charge.succeeded" => WebhookAction::PaymentSucceeded,
            "payment_intent.payment_failed" => WebhookAction::PaymentFailed,
            "payment_intent.processing" => WebhookAction::PaymentProcessing,
            "payment_intent.canceled" => WebhookAction::PaymentCancelled,
            "charge.refunded" => {
                let amount_refunded = object.amount_refunded.ok_or_else(|| {
                    ShopilentError::validation("charge.refunded event without amount_refunded")
                })?;
                WebhookAction::Refunded { amount_refunded }
            }
            _ => WebhookAction::Ignored,
        };

        if !action.is_ignored() && external_reference.is_none() && order_id.is_none() {
            return Err(ShopilentError::validation(format!(
                "stripe event {} carries no payment reference",
                event.id
            )));
        }

        Ok(ProviderEvent {
            event_id: event.id,
            event_type: event.event_type,
            created_at,
            external_reference,
            order_id,
            amount: object.amount,
            amount_refunded: object.amount_refunded,
            transaction_id,
            failure_reason,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<ProviderEvent> {
        StripeParser.parse(value.to_string().as_bytes())
    }

    #[test]
    fn payment_intent_succeeded() {
        let order_id = Uuid::new_v4();
        let event = parse(json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "pi_123",
                "amount": 2500,
                "latest_charge": "ch_9",
                "metadata": { "order_id": order_id.to_string() }
            }}
        }))
        .unwrap();

        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.external_reference.as_deref(), Some("pi_123"));
        assert_eq!(event.transaction_id.as_deref(), Some("ch_9"));
        assert_eq!(event.order_id, Some(order_id));
        assert_eq!(event.amount, Some(2500));
        assert_eq!(event.action, WebhookAction::PaymentSucceeded);
        assert!(event.created_at.is_some());
    }

    #[test]
    fn charge_refunded_uses_cumulative_amount() {
        let event = parse(json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": {
                "id": "ch_9",
                "payment_intent": "pi_123",
                "amount": 2500,
                "amount_refunded": 1000
            }}
        }))
        .unwrap();

        assert_eq!(event.external_reference.as_deref(), Some("pi_123"));
        assert_eq!(event.transaction_id.as_deref(), Some("ch_9"));
        assert_eq!(event.action, WebhookAction::Refunded { amount_refunded: 1000 });
    }

    #[test]
    fn failure_reason_prefers_last_payment_error() {
        let event = parse(json!({
            "id": "evt_3",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_1",
                "last_payment_error": { "message": "card declined", "code": "card_declined" }
            }}
        }))
        .unwrap();
        assert_eq!(event.action, WebhookAction::PaymentFailed);
        assert_eq!(event.failure_reason.as_deref(), Some("card declined"));
    }

    #[test]
    fn unknown_types_are_ignored() {
        let event = parse(json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": { "object": { "id": "cus_1" } }
        }))
        .unwrap();
        assert_eq!(event.action, WebhookAction::Ignored);
        assert!(event.external_reference.is_none());
    }

    #[test]
    fn rejects_unusable_payloads() {
        assert!(StripeParser.parse(b"not json").is_err());

        let missing_refund = parse(json!({
            "id": "evt_5",
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "payment_intent": "pi_1" } }
        }));
        assert!(matches!(missing_refund, Err(ShopilentError::Validation(_))));

        let no_reference = parse(json!({
            "id": "evt_6",
            "type": "charge.succeeded",
            "data": { "object": { "id": "ch_1" } }
        }));
        assert!(matches!(no_reference, Err(ShopilentError::Validation(_))));
    }
}
