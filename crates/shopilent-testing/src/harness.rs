//! Wired-up pipeline over [`InMemoryStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shopilent_core::domain::{Order, Payment, PaymentProvider};
use shopilent_core::{
    EventBus, OrderCache, OrderCacheInvalidator, OrderService, Principal, Result,
};
use shopilent_outbox::{OutboxWorker, RetryPolicy};
use shopilent_payments::{WebhookOutcome, WebhookProcessor, WebhookSettings};

use crate::fixtures;
use crate::handlers::RecordingHandler;
use crate::memory::InMemoryStore;

/// Store, service, webhook processor and bus sharing one in-memory store.
///
/// A [`RecordingHandler`] and an [`OrderCacheInvalidator`] are subscribed
/// to every event.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<OrderCache>,
    pub service: OrderService,
    pub webhooks: Arc<WebhookProcessor>,
    pub bus: Arc<EventBus>,
    pub recorder: Arc<RecordingHandler>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(OrderCache::new(Duration::from_secs(60)));
        let service = OrderService::new(store.clone(), cache.clone());
        let webhooks = Arc::new(
            WebhookProcessor::new(store.clone(), WebhookSettings::default())
                .with_stripe(fixtures::WEBHOOK_SECRET),
        );

        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(RecordingHandler::new());
        bus.subscribe_all(recorder.clone());
        bus.subscribe_all(Arc::new(OrderCacheInvalidator::new(cache.clone())));

        Self {
            store,
            cache,
            service,
            webhooks,
            bus,
            recorder,
        }
    }

    /// Outbox worker over the harness store and bus, without jitter.
    pub fn worker(&self) -> OutboxWorker {
        OutboxWorker::new(self.store.clone(), self.bus.clone()).with_retry_policy(RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter: false,
        })
    }

    /// Create an order for `customer` and register a Stripe payment for it.
    pub async fn order_with_payment(&self, customer: &Principal, intent_id: &str) -> Result<(Order, Payment)> {
        let order = self
            .service
            .create_order(customer, fixtures::items(), "EUR")
            .await?;
        let payment = self
            .service
            .create_payment(customer, order.id, PaymentProvider::Stripe, intent_id)
            .await?;
        Ok((order, payment))
    }

    /// Sign `payload` now and run it through the webhook processor.
    pub async fn deliver(&self, payload: &[u8]) -> Result<WebhookOutcome> {
        let signature = fixtures::sign(payload, Utc::now());
        self.webhooks.process("stripe", payload, &signature).await
    }
}
