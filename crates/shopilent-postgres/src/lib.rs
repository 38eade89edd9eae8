//! PostgreSQL storage for Shopilent.
//!
//! [`PgStore`] implements both [`CommerceStore`](shopilent_core::CommerceStore)
//! and [`OutboxStore`](shopilent_outbox::OutboxStore) on one pool, so an
//! aggregate change, its outbox messages and a webhook receipt share a
//! transaction.
//!
//! # Features
//!
//! - Optimistic version checks on `orders` and `payments`
//! - Outbox claiming with `FOR UPDATE SKIP LOCKED` and a short lease
//! - `(provider, event_id)` primary key on `webhook_receipts` as the
//!   idempotency guard
//!
//! The schema lives in `migrations/` and is applied by [`PgStore::migrate`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use shopilent_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/shopilent").await?;
//! let store = PgStore::new(pool);
//! store.migrate().await?;
//! ```

mod commerce;
mod outbox;
mod rows;

use anyhow::Context;
use shopilent_core::Result;
use sqlx::PgPool;

/// PostgreSQL-backed store for orders, payments, receipts and the outbox.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")?;
        Ok(())
    }
}

/// SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}
