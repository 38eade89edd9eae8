//! SQLx row mappings. Status columns are stored as text and parsed back.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shopilent_core::domain::{Order, OrderItem, Payment, PendingEvents};
use shopilent_core::{OutboxMessage, Result, WebhookReceipt};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(crate) struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Json<Vec<OrderItem>>,
    pub currency: String,
    pub total: i64,
    pub refunded_amount: i64,
    pub status: String,
    pub payment_status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = shopilent_core::ShopilentError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            items: row.items.0,
            currency: row.currency,
            total: row.total,
            refunded_amount: row.refunded_amount,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            pending: PendingEvents::default(),
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub external_reference: String,
    pub amount: i64,
    pub refunded_amount: i64,
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub version: i64,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = shopilent_core::ShopilentError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            provider: row.provider.parse()?,
            external_reference: row.external_reference,
            amount: row.amount,
            refunded_amount: row.refunded_amount,
            currency: row.currency,
            status: row.status.parse()?,
            transaction_id: row.transaction_id,
            error_message: row.error_message,
            version: row.version,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            pending: PendingEvents::default(),
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct OutboxRow {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub payload: Value,
    pub status: String,
    pub retry_count: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = shopilent_core::ShopilentError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        Ok(OutboxMessage {
            id: row.id,
            event_type: row.event_type,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            status: row.status.parse()?,
            retry_count: row.retry_count,
            error: row.error,
            created_at: row.created_at,
            scheduled_at: row.scheduled_at,
            processed_at: row.processed_at,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReceiptRow {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub outcome: String,
    pub received_at: DateTime<Utc>,
}

impl From<ReceiptRow> for WebhookReceipt {
    fn from(row: ReceiptRow) -> Self {
        Self {
            provider: row.provider,
            event_id: row.event_id,
            event_type: row.event_type,
            outcome: row.outcome,
            received_at: row.received_at,
        }
    }
}

pub(crate) fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = shopilent_core::ShopilentError>,
{
    rows.into_iter().map(T::try_from).collect()
}
