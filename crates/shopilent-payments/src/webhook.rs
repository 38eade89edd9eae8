//! Verified, idempotent webhook reconciliation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shopilent_core::domain::{Order, Payment, PaymentProvider, Transition};
use shopilent_core::{Changeset, CommerceStore, Result, ShopilentError, WebhookReceipt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::provider::{ProviderEvent, StripeParser, WebhookAction, WebhookParser};
use crate::signature::WebhookVerifier;

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Allowed clock skew between the signature timestamp and now.
    pub tolerance: Duration,
    /// Reload-and-retry rounds after an optimistic version conflict.
    pub max_conflict_retries: u32,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_secs(300),
            max_conflict_retries: 3,
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        event_id: String,
        payment_id: Uuid,
        order_id: Uuid,
    },
    /// The aggregates already reflect the event; only the receipt was written.
    AlreadyApplied { event_id: String },
    /// The event id was receipted before.
    Duplicate { event_id: String },
    Ignored { event_id: String, event_type: String },
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::AlreadyApplied { .. } => "already_applied",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::Ignored { .. } => "ignored",
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            WebhookOutcome::Applied { event_id, .. }
            | WebhookOutcome::AlreadyApplied { event_id }
            | WebhookOutcome::Duplicate { event_id }
            | WebhookOutcome::Ignored { event_id, .. } => event_id,
        }
    }
}

struct RegisteredProvider {
    parser: Arc<dyn WebhookParser>,
    verifier: WebhookVerifier,
}

/// Verifies provider deliveries and applies them to orders and payments
/// exactly once per `(provider, event_id)`.
pub struct WebhookProcessor {
    store: Arc<dyn CommerceStore>,
    providers: HashMap<String, RegisteredProvider>,
    settings: WebhookSettings,
}

impl std::fmt::Debug for WebhookProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProcessor")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn CommerceStore>, settings: WebhookSettings) -> Self {
        Self {
            store,
            providers: HashMap::new(),
            settings,
        }
    }

    /// Register a parser under its provider name with a shared secret.
    ///
    /// An empty secret leaves the provider unconfigured.
    pub fn register(mut self, parser: Arc<dyn WebhookParser>, secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        if secret.is_empty() {
            warn!(provider = %parser.provider(), "webhook secret is empty, provider disabled");
            return self;
        }
        let name = parser.provider().as_str().to_string();
        let verifier = WebhookVerifier::new(secret, self.settings.tolerance);
        self.providers
            .insert(name, RegisteredProvider { parser, verifier });
        self
    }

    pub fn with_stripe(self, secret: impl AsRef<[u8]>) -> Self {
        self.register(Arc::new(StripeParser), secret)
    }

    pub fn settings(&self) -> &WebhookSettings {
        &self.settings
    }

    /// Signature header name for a configured provider.
    pub fn signature_header(&self, provider: &str) -> Option<&'static str> {
        self.providers
            .get(&provider.to_ascii_lowercase())
            .map(|p| p.parser.signature_header())
    }

    pub async fn process(
        &self,
        provider: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome> {
        self.process_at(provider, payload, signature, Utc::now()).await
    }

    #[instrument(skip(self, payload, signature), fields(event_id = tracing::field::Empty))]
    pub async fn process_at(
        &self,
        provider: &str,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let key = provider.to_ascii_lowercase();
        let registered = self.providers.get(&key).ok_or_else(|| {
            ShopilentError::validation(format!("unsupported or unconfigured payment provider '{provider}'"))
        })?;

        if let Err(err) = registered.verifier.verify(payload, signature, now) {
            warn!(provider = %key, error = %err, "rejected webhook signature");
            return Err(err.into());
        }

        let event = registered.parser.parse(payload)?;
        tracing::Span::current().record("event_id", event.event_id.as_str());

        if self
            .store
            .webhook_receipt(&key, &event.event_id)
            .await?
            .is_some()
        {
            debug!(event_type = %event.event_type, "duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate {
                event_id: event.event_id,
            });
        }

        if event.action.is_ignored() {
            return self.record_ignored(&key, event, now).await;
        }

        let mut attempt = 0;
        loop {
            match self
                .reconcile(&key, registered.parser.provider(), &event, now)
                .await
            {
                Ok(outcome) => {
                    info!(
                        event_type = %event.event_type,
                        outcome = outcome.as_str(),
                        "webhook processed"
                    );
                    return Ok(outcome);
                }
                Err(ShopilentError::DuplicateEvent(_)) => {
                    debug!("webhook applied concurrently by another request");
                    return Ok(WebhookOutcome::Duplicate {
                        event_id: event.event_id.clone(),
                    });
                }
                Err(err) if err.is_concurrency_conflict() && attempt < self.settings.max_conflict_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "version conflict, reloading");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn record_ignored(
        &self,
        provider: &str,
        event: ProviderEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let mut changes = Changeset::new();
        changes.record_receipt(receipt(provider, &event, "ignored", now));
        match self.store.commit(changes).await {
            Ok(()) | Err(ShopilentError::DuplicateEvent(_)) => {}
            Err(err) => return Err(err),
        }
        debug!(event_type = %event.event_type, "ignored webhook event");
        Ok(WebhookOutcome::Ignored {
            event_id: event.event_id,
            event_type: event.event_type,
        })
    }

    async fn reconcile(
        &self,
        provider_key: &str,
        provider: PaymentProvider,
        event: &ProviderEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let mut payment = self.find_payment(provider, event).await?;
        let mut order = self
            .store
            .order(payment.order_id)
            .await?
            .ok_or_else(|| ShopilentError::not_found("order", payment.order_id))?;

        // Outcomes of an older attempt must not overwrite the order's view of a newer one.
        let superseded = match event.action {
            WebhookAction::PaymentProcessing
            | WebhookAction::PaymentFailed
            | WebhookAction::PaymentCancelled => self
                .store
                .payments_for_order(order.id)
                .await?
                .first()
                .is_some_and(|newest| newest.id != payment.id),
            _ => false,
        };

        let payment_change = apply_to_payment(&mut payment, event, now);
        let order_change = if payment_change.is_applied() && !superseded {
            apply_to_order(&mut order, payment.id, event, now)
        } else {
            Transition::Unchanged
        };

        let applied = payment_change.is_applied() || order_change.is_applied();
        if payment_change == Transition::Rejected || order_change == Transition::Rejected {
            warn!(
                payment_id = %payment.id,
                payment_status = %payment.status,
                order_payment_status = %order.payment_status,
                event_type = %event.event_type,
                "webhook event does not fit current payment state"
            );
        }

        let mut changes = Changeset::new();
        if payment_change.is_applied() {
            changes.track_payment(&mut payment, now)?;
        }
        if order_change.is_applied() {
            changes.track_order(&mut order, now)?;
        }
        let label = if applied { "applied" } else { "already_applied" };
        changes.record_receipt(receipt(provider_key, event, label, now));
        self.store.commit(changes).await?;

        if applied {
            Ok(WebhookOutcome::Applied {
                event_id: event.event_id.clone(),
                payment_id: payment.id,
                order_id: order.id,
            })
        } else {
            Ok(WebhookOutcome::AlreadyApplied {
                event_id: event.event_id.clone(),
            })
        }
    }

    /// By provider reference when the event carries one, otherwise the
    /// newest payment of the order named in the event metadata.
    async fn find_payment(&self, provider: PaymentProvider, event: &ProviderEvent) -> Result<Payment> {
        if let Some(reference) = event.external_reference.as_deref() {
            return self
                .store
                .payment_by_reference(provider, reference)
                .await?
                .ok_or_else(|| ShopilentError::not_found("payment", reference));
        }
        if let Some(order_id) = event.order_id {
            let candidate = self
                .store
                .payments_for_order(order_id)
                .await?
                .into_iter()
                .find(|p| p.provider == provider);
            if let Some(payment) = candidate {
                return Ok(payment);
            }
        }
        let id = event
            .order_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| event.event_id.clone());
        Err(ShopilentError::not_found("payment", id))
    }
}

fn apply_to_payment(payment: &mut Payment, event: &ProviderEvent, now: DateTime<Utc>) -> Transition {
    match &event.action {
        WebhookAction::PaymentSucceeded => payment.mark_succeeded(event.transaction_id.clone(), now),
        WebhookAction::PaymentProcessing => payment.mark_processing(now),
        WebhookAction::PaymentFailed => payment.mark_failed(event.failure_reason.clone(), now),
        WebhookAction::PaymentCancelled => payment.mark_cancelled(now),
        WebhookAction::Refunded { amount_refunded } => payment.record_refund(*amount_refunded, now),
        WebhookAction::Ignored => Transition::Unchanged,
    }
}

fn apply_to_order(order: &mut Order, payment_id: Uuid, event: &ProviderEvent, now: DateTime<Utc>) -> Transition {
    match &event.action {
        WebhookAction::PaymentSucceeded => order.mark_as_paid(Some(payment_id), now),
        WebhookAction::PaymentProcessing => order.mark_payment_processing(now),
        WebhookAction::PaymentFailed => order.mark_payment_failed(event.failure_reason.clone(), now),
        WebhookAction::PaymentCancelled => order.mark_payment_cancelled(now),
        WebhookAction::Refunded { amount_refunded } => order.record_refund(*amount_refunded, now),
        WebhookAction::Ignored => Transition::Unchanged,
    }
}

fn receipt(provider: &str, event: &ProviderEvent, outcome: &str, now: DateTime<Utc>) -> WebhookReceipt {
    WebhookReceipt {
        provider: provider.to_string(),
        event_id: event.event_id.clone(),
        event_type: event.event_type.clone(),
        outcome: outcome.to_string(),
        received_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        let applied = WebhookOutcome::Applied {
            event_id: "evt_1".into(),
            payment_id: Uuid::nil(),
            order_id: Uuid::nil(),
        };
        assert_eq!(applied.as_str(), "applied");
        assert_eq!(applied.event_id(), "evt_1");

        let json = serde_json::to_value(WebhookOutcome::Duplicate {
            event_id: "evt_2".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "duplicate");
        assert_eq!(json["event_id"], "evt_2");
    }
}
