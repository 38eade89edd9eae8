//! Principals, orders and signed Stripe payloads.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use shopilent_core::domain::{Order, OrderItem};
use shopilent_core::{Principal, Role};
use shopilent_payments::WebhookVerifier;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_shopilent_test";

pub fn customer() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Customer)
}

pub fn manager() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Manager)
}

pub fn admin() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Admin)
}

/// Two lines totalling 4 000 minor units.
pub fn items() -> Vec<OrderItem> {
    vec![
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Ceramic mug".into(),
            quantity: 2,
            unit_price: 1_250,
        },
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Tea sampler".into(),
            quantity: 1,
            unit_price: 1_500,
        },
    ]
}

/// An unsaved order; its `order.created` event is still buffered.
pub fn order(user_id: Uuid) -> Order {
    match Order::new(user_id, items(), "EUR", Utc::now()) {
        Ok(order) => order,
        Err(err) => panic!("fixture order is valid: {err}"),
    }
}

/// Raw Stripe event body.
pub fn stripe_event(event_id: &str, event_type: &str, object: Value) -> Vec<u8> {
    json!({
        "id": event_id,
        "object": "event",
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object }
    })
    .to_string()
    .into_bytes()
}

/// `payment_intent.*` event for `intent_id`, tagged with the order id.
pub fn payment_intent_event(event_id: &str, event_type: &str, intent_id: &str, order_id: Uuid) -> Vec<u8> {
    stripe_event(
        event_id,
        event_type,
        json!({
            "id": intent_id,
            "object": "payment_intent",
            "amount": 4_000,
            "latest_charge": format!("ch_{intent_id}"),
            "metadata": { "order_id": order_id.to_string() },
            "last_payment_error": if event_type == "payment_intent.payment_failed" {
                json!({ "message": "Your card was declined.", "code": "card_declined" })
            } else {
                Value::Null
            }
        }),
    )
}

/// `charge.refunded` with a cumulative refunded amount.
pub fn charge_refunded_event(event_id: &str, intent_id: &str, amount_refunded: i64) -> Vec<u8> {
    stripe_event(
        event_id,
        "charge.refunded",
        json!({
            "id": format!("ch_{intent_id}"),
            "object": "charge",
            "payment_intent": intent_id,
            "amount": 4_000,
            "amount_refunded": amount_refunded,
        }),
    )
}

/// `Stripe-Signature` value for `payload` signed with [`WEBHOOK_SECRET`].
pub fn sign(payload: &[u8], at: DateTime<Utc>) -> String {
    WebhookVerifier::new(WEBHOOK_SECRET, std::time::Duration::from_secs(300)).sign(at.timestamp(), payload)
}
