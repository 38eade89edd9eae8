use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shopilent_core::domain::PaymentProvider;
use shopilent_core::{
    CommerceStore, EventAuditLog, EventBus, OrderCache, OrderCacheInvalidator, OrderService,
    Principal,
};
use shopilent_outbox::{OutboxStore, OutboxWorker};
use shopilent_payments::{StripeParser, WebhookParser, WebhookProcessor};
use tracing::info;

use crate::config::Settings;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: OrderService,
    pub webhooks: Arc<WebhookProcessor>,
    pub outbox: Arc<dyn OutboxStore>,
    tokens: Arc<HashMap<String, Principal>>,
}

impl AppState {
    pub fn principal(&self, token: &str) -> Option<&Principal> {
        self.tokens.get(token)
    }
}

/// Everything the process runs: request state plus the outbox worker.
pub struct Runtime {
    pub state: AppState,
    pub worker: OutboxWorker,
    pub bus: Arc<EventBus>,
}

/// Wire services, webhook providers, the event bus and the worker over one store.
pub fn assemble<S>(store: Arc<S>, settings: &Settings) -> Result<Runtime>
where
    S: CommerceStore + OutboxStore + 'static,
{
    let cache = Arc::new(OrderCache::new(Duration::from_secs(
        settings.cache.order_ttl_secs,
    )));
    let service = OrderService::new(store.clone(), cache.clone());

    let mut webhooks = WebhookProcessor::new(store.clone(), settings.webhooks.to_settings());
    for (name, provider) in &settings.webhooks.providers {
        let parser: Arc<dyn WebhookParser> = match name.parse::<PaymentProvider>()? {
            PaymentProvider::Stripe => Arc::new(StripeParser),
        };
        webhooks = webhooks.register(parser, provider.secret.as_bytes());
        info!(provider = %name, "webhook provider registered");
    }

    let bus = Arc::new(EventBus::new());
    bus.subscribe_all(Arc::new(OrderCacheInvalidator::new(cache)));
    bus.subscribe_all(Arc::new(EventAuditLog));

    let worker = OutboxWorker::new(store.clone(), bus.clone())
        .with_config(settings.outbox.to_config());

    let state = AppState {
        service,
        webhooks: Arc::new(webhooks),
        outbox: store,
        tokens: Arc::new(settings.auth.principals()),
    };
    Ok(Runtime { state, worker, bus })
}
