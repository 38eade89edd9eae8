use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shopilent_core::{OutboxMessage, Result};
use shopilent_outbox::{OutboxStats, OutboxStore};
use sqlx::Row;
use uuid::Uuid;

use crate::rows::{collect, OutboxRow};
use crate::PgStore;

const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, payload, status, \
     retry_count, error, created_at, scheduled_at, processed_at, locked_by, locked_until";

#[async_trait]
impl OutboxStore for PgStore {
    /// Stamps a lease with `FOR UPDATE SKIP LOCKED` and returns at once;
    /// the row lock ends with the statement.
    async fn claim_due(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let lease = chrono::Duration::from_std(lease).context("lease out of range")?;
        let locked_until = now + lease;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            WITH due AS (
                SELECT id
                FROM outbox_messages
                WHERE status = 'pending'
                  AND scheduled_at <= $1
                  AND (locked_until IS NULL OR locked_until <= $1)
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_messages m
            SET locked_by = $3,
                locked_until = $4
            FROM due
            WHERE m.id = due.id
            RETURNING {}
            "#,
            prefixed("m", OUTBOX_COLUMNS)
        ))
        .bind(now)
        .bind(limit)
        .bind(worker_id)
        .bind(locked_until)
        .fetch_all(self.pool())
        .await
        .context("claiming outbox messages")?;

        let mut messages: Vec<OutboxMessage> = collect(rows)?;
        messages.sort_by_key(|m| (m.scheduled_at, m.created_at));
        Ok(messages)
    }

    async fn mark_processed(&self, id: Uuid, worker_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'processed',
                processed_at = $1,
                error = NULL,
                locked_by = NULL,
                locked_until = NULL
            WHERE id = $2 AND status = 'pending' AND locked_by = $3
            "#,
        )
        .bind(at)
        .bind(id)
        .bind(worker_id)
        .execute(self.pool())
        .await
        .context("marking outbox message processed")?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = $1,
                error = $2,
                scheduled_at = $3,
                locked_by = NULL,
                locked_until = NULL
            WHERE id = $4 AND status = 'pending' AND locked_by = $5
            "#,
        )
        .bind(retry_count)
        .bind(error)
        .bind(next_attempt_at)
        .bind(id)
        .bind(worker_id)
        .execute(self.pool())
        .await
        .context("rescheduling outbox message")?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        retry_count: i32,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed',
                retry_count = $1,
                error = $2,
                processed_at = $3,
                locked_by = NULL,
                locked_until = NULL
            WHERE id = $4 AND status = 'pending' AND locked_by = $5
            "#,
        )
        .bind(retry_count)
        .bind(error)
        .bind(at)
        .bind(id)
        .bind(worker_id)
        .execute(self.pool())
        .await
        .context("marking outbox message failed")?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxMessage>> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("loading outbox message")?;
        row.map(OutboxMessage::try_from).transpose()
    }

    async fn failed(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE status = 'failed' \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .context("listing failed outbox messages")?;
        collect(rows)
    }

    async fn requeue(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'pending',
                retry_count = 0,
                scheduled_at = $1,
                processed_at = NULL,
                locked_by = NULL,
                locked_until = NULL
            WHERE id = $2 AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await
        .context("requeueing outbox message")?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE status = 'processed'
              AND processed_at < $1
            "#,
        )
        .bind(older_than)
        .execute(self.pool())
        .await
        .context("purging processed outbox messages")?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<OutboxStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processed') AS processed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'pending' AND retry_count > 0) AS retrying
            FROM outbox_messages
            "#,
        )
        .fetch_one(self.pool())
        .await
        .context("reading outbox stats")?;

        Ok(OutboxStats {
            pending: row.try_get("pending").context("pending count")?,
            processed: row.try_get("processed").context("processed count")?,
            failed: row.try_get("failed").context("failed count")?,
            retrying: row.try_get("retrying").context("retrying count")?,
        })
    }
}

/// `"a, b"` with prefix `m` becomes `"m.a, m.b"`.
fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_every_column() {
        assert_eq!(prefixed("m", "id, event_type,status"), "m.id, m.event_type, m.status");
        assert!(prefixed("m", OUTBOX_COLUMNS).starts_with("m.id, m.event_type"));
        assert!(prefixed("m", OUTBOX_COLUMNS).ends_with("m.locked_until"));
    }
}
