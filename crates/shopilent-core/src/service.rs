//! Order and payment use cases behind the HTTP surface.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::Principal;
use crate::cache::OrderCache;
use crate::domain::{Order, OrderItem, OrderStatus, Payment, PaymentProvider, Transition};
use crate::error::{Result, ShopilentError};
use crate::store::{Changeset, CommerceStore};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn CommerceStore>,
    cache: Arc<OrderCache>,
}

impl OrderService {
    pub fn new(store: Arc<dyn CommerceStore>, cache: Arc<OrderCache>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn CommerceStore> {
        &self.store
    }

    #[instrument(skip(self, items), fields(user_id = %principal.user_id))]
    pub async fn create_order(
        &self,
        principal: &Principal,
        items: Vec<OrderItem>,
        currency: &str,
    ) -> Result<Order> {
        let now = Utc::now();
        let mut order = Order::new(principal.user_id, items, currency, now)?;

        let mut changes = Changeset::new();
        changes.track_order(&mut order, now)?;
        self.store.commit(changes).await?;
        order.mark_committed();

        info!(order_id = %order.id, total = order.total, "order created");
        Ok(order)
    }

    /// Read-through: the cache is filled on miss and evicted by outbox events.
    pub async fn get_order(&self, principal: &Principal, id: Uuid) -> Result<Order> {
        let order = match self.cache.get(&id) {
            Some(order) => order,
            None => {
                let order = self.load(id).await?;
                self.cache.insert(id, order.clone());
                order
            }
        };
        if !principal.can_access(&order) {
            // Same answer as a missing order so ids cannot be probed.
            return Err(ShopilentError::not_found("order", id));
        }
        Ok(order)
    }

    /// Staff-only status change.
    ///
    /// With `expected_version` the caller asserts which version it saw; a
    /// stale version is a conflict. Without it the version loaded here is
    /// used, so a concurrent writer still makes one of the two fail.
    #[instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn update_order_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: OrderStatus,
        expected_version: Option<i64>,
    ) -> Result<Order> {
        principal.require_staff()?;
        let mut order = self.load(id).await?;
        if let Some(expected) = expected_version {
            if expected != order.version {
                return Err(ShopilentError::concurrency("order", id, expected));
            }
        }

        let now = Utc::now();
        match order.update_status(status, now) {
            Transition::Unchanged => return Ok(order),
            Transition::Rejected => {
                return Err(ShopilentError::validation(format!(
                    "cannot move order from {} to {}",
                    order.status, status
                )))
            }
            Transition::Applied => {}
        }

        self.save_order(&mut order, now).await?;
        info!(order_id = %id, status = %status, "order status updated");
        Ok(order)
    }

    #[instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn cancel_order(&self, principal: &Principal, id: Uuid) -> Result<Order> {
        let mut order = self.load(id).await?;
        if !principal.can_access(&order) {
            return Err(ShopilentError::not_found("order", id));
        }

        let now = Utc::now();
        match order.cancel(now) {
            Transition::Unchanged => return Ok(order),
            Transition::Rejected => {
                return Err(ShopilentError::validation(format!(
                    "order in status {} can no longer be cancelled",
                    order.status
                )))
            }
            Transition::Applied => {}
        }

        self.save_order(&mut order, now).await?;
        info!(order_id = %id, "order cancelled");
        Ok(order)
    }

    /// Record a pending payment whose provider-side intent was created by
    /// the storefront. The webhook pipeline settles it later.
    #[instrument(skip(self, external_reference), fields(user_id = %principal.user_id))]
    pub async fn create_payment(
        &self,
        principal: &Principal,
        order_id: Uuid,
        provider: PaymentProvider,
        external_reference: &str,
    ) -> Result<Payment> {
        let order = self.load(order_id).await?;
        if !principal.can_access(&order) {
            return Err(ShopilentError::not_found("order", order_id));
        }
        if order.status.is_terminal() {
            return Err(ShopilentError::validation(format!(
                "order is {} and cannot take payments",
                order.status
            )));
        }
        if order.payment_status.is_captured() {
            return Err(ShopilentError::Conflict(format!("order {order_id} is already paid")));
        }
        if self
            .store
            .payment_by_reference(provider, external_reference)
            .await?
            .is_some()
        {
            return Err(ShopilentError::Conflict(format!(
                "payment reference {external_reference} is already registered"
            )));
        }

        let now = Utc::now();
        let mut payment = Payment::new(
            order.id,
            provider,
            external_reference,
            order.total,
            order.currency.clone(),
            now,
        )?;

        let mut changes = Changeset::new();
        changes.track_payment(&mut payment, now)?;
        self.store.commit(changes).await?;
        payment.mark_committed();

        info!(payment_id = %payment.id, %order_id, provider = %provider, "payment registered");
        Ok(payment)
    }

    pub async fn payments_for_order(&self, principal: &Principal, order_id: Uuid) -> Result<Vec<Payment>> {
        let order = self.get_order(principal, order_id).await?;
        self.store.payments_for_order(order.id).await
    }

    async fn load(&self, id: Uuid) -> Result<Order> {
        self.store
            .order(id)
            .await?
            .ok_or_else(|| ShopilentError::not_found("order", id))
    }

    async fn save_order(&self, order: &mut Order, now: chrono::DateTime<Utc>) -> Result<()> {
        let mut changes = Changeset::new();
        changes.track_order(order, now)?;
        self.store.commit(changes).await?;
        order.mark_committed();
        self.cache.invalidate(&order.id);
        Ok(())
    }
}
