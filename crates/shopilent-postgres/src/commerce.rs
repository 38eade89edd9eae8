use anyhow::Context;
use async_trait::async_trait;
use shopilent_core::domain::{Order, Payment, PaymentProvider};
use shopilent_core::{
    Changeset, CommerceStore, OutboxMessage, Result, ShopilentError, WebhookReceipt,
};
use sqlx::types::Json;
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use crate::rows::{collect, OrderRow, PaymentRow, ReceiptRow};
use crate::{is_unique_violation, PgStore};

const ORDER_COLUMNS: &str = "id, user_id, items, currency, total, refunded_amount, status, \
     payment_status, version, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, provider, external_reference, amount, \
     refunded_amount, currency, status, transaction_id, error_message, version, processed_at, \
     created_at, updated_at";

#[async_trait]
impl CommerceStore for PgStore {
    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .context("loading order")?;
        row.map(Order::try_from).transpose()
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .context("loading payment")?;
        row.map(Payment::try_from).transpose()
    }

    async fn payment_by_reference(
        &self,
        provider: PaymentProvider,
        reference: &str,
    ) -> Result<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND external_reference = $2"
        ))
        .bind(provider.as_str())
        .bind(reference)
        .fetch_optional(self.pool())
        .await
        .context("loading payment by reference")?;
        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_at DESC"
        ))
        .bind(order_id)
        .fetch_all(self.pool())
        .await
        .context("loading payments for order")?;
        collect(rows)
    }

    async fn webhook_receipt(&self, provider: &str, event_id: &str) -> Result<Option<WebhookReceipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as(
            r#"
            SELECT provider, event_id, event_type, outcome, received_at
            FROM webhook_receipts
            WHERE provider = $1 AND event_id = $2
            "#,
        )
        .bind(provider)
        .bind(event_id)
        .fetch_optional(self.pool())
        .await
        .context("loading webhook receipt")?;
        Ok(row.map(WebhookReceipt::from))
    }

    async fn commit(&self, changes: Changeset) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await.context("beginning transaction")?;

        // Dropping `tx` on any early return rolls everything back.
        if let Some(receipt) = &changes.receipt {
            insert_receipt(&mut *tx, receipt).await?;
        }
        for order in &changes.orders {
            save_order(&mut *tx, order).await?;
        }
        for payment in &changes.payments {
            save_payment(&mut *tx, payment).await?;
        }
        for message in &changes.outbox {
            insert_outbox(&mut *tx, message).await?;
        }

        tx.commit().await.context("committing changeset")?;
        debug!(
            orders = changes.orders.len(),
            payments = changes.payments.len(),
            messages = changes.outbox.len(),
            "changeset committed"
        );
        Ok(())
    }
}

async fn insert_receipt(conn: &mut PgConnection, receipt: &WebhookReceipt) -> Result<()> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO webhook_receipts (provider, event_id, event_type, outcome, received_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (provider, event_id) DO NOTHING
        "#,
    )
    .bind(&receipt.provider)
    .bind(&receipt.event_id)
    .bind(&receipt.event_type)
    .bind(&receipt.outcome)
    .bind(receipt.received_at)
    .execute(&mut *conn)
    .await
    .context("inserting webhook receipt")?
    .rows_affected();

    if inserted == 0 {
        return Err(ShopilentError::DuplicateEvent(format!(
            "{}/{}",
            receipt.provider, receipt.event_id
        )));
    }
    Ok(())
}

async fn save_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    if order.version == 0 {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, currency, total, refunded_amount, status,
                                payment_status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(Json(&order.items))
        .bind(&order.currency)
        .bind(order.total)
        .bind(order.refunded_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await
        .context("inserting order")?;
        return Ok(());
    }

    let updated = sqlx::query(
        r#"
        UPDATE orders
        SET items = $1,
            total = $2,
            refunded_amount = $3,
            status = $4,
            payment_status = $5,
            updated_at = $6,
            version = version + 1
        WHERE id = $7 AND version = $8
        "#,
    )
    .bind(Json(&order.items))
    .bind(order.total)
    .bind(order.refunded_amount)
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.updated_at)
    .bind(order.id)
    .bind(order.version)
    .execute(&mut *conn)
    .await
    .context("updating order")?
    .rows_affected();

    if updated == 0 {
        return Err(ShopilentError::concurrency("order", order.id, order.version));
    }
    Ok(())
}

async fn save_payment(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
    if payment.version == 0 {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, provider, external_reference, amount,
                                  refunded_amount, currency, status, transaction_id,
                                  error_message, version, processed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12, $13)
            "#,
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.provider.as_str())
        .bind(&payment.external_reference)
        .bind(payment.amount)
        .bind(payment.refunded_amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.error_message)
        .bind(payment.processed_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await;

        return match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ShopilentError::Conflict(format!(
                "payment reference {} is already registered",
                payment.external_reference
            ))),
            Err(err) => Err(anyhow::Error::new(err).context("inserting payment").into()),
        };
    }

    let updated = sqlx::query(
        r#"
        UPDATE payments
        SET refunded_amount = $1,
            status = $2,
            transaction_id = $3,
            error_message = $4,
            processed_at = $5,
            updated_at = $6,
            version = version + 1
        WHERE id = $7 AND version = $8
        "#,
    )
    .bind(payment.refunded_amount)
    .bind(payment.status.as_str())
    .bind(&payment.transaction_id)
    .bind(&payment.error_message)
    .bind(payment.processed_at)
    .bind(payment.updated_at)
    .bind(payment.id)
    .bind(payment.version)
    .execute(&mut *conn)
    .await
    .context("updating payment")?
    .rows_affected();

    if updated == 0 {
        return Err(ShopilentError::concurrency("payment", payment.id, payment.version));
    }
    Ok(())
}

async fn insert_outbox(conn: &mut PgConnection, message: &OutboxMessage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, event_type, aggregate_type, aggregate_id, payload,
                                     status, retry_count, error, created_at, scheduled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(message.id)
    .bind(&message.event_type)
    .bind(&message.aggregate_type)
    .bind(message.aggregate_id)
    .bind(&message.payload)
    .bind(message.status.as_str())
    .bind(message.retry_count)
    .bind(&message.error)
    .bind(message.created_at)
    .bind(message.scheduled_at)
    .execute(&mut *conn)
    .await
    .context("inserting outbox message")?;
    Ok(())
}
