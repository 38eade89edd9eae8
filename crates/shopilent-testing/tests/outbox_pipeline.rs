use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shopilent_core::domain::{OrderStatus, PaymentProvider};
use shopilent_core::OutboxStatus;
use shopilent_outbox::{Delivery, OutboxStore};
use shopilent_testing::{fixtures, FailingHandler, Harness};

#[tokio::test]
async fn committed_events_reach_subscribers() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let (order, _) = h.order_with_payment(&customer, "pi_flow").await.unwrap();

    let report = h.worker().drain().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(h.recorder.event_types(), vec!["order.created", "payment.created"]);

    let envelope = &h.recorder.envelopes()[0];
    assert_eq!(envelope.aggregate_id, order.id);
    assert_eq!(envelope.attempt, 1);

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn processed_messages_are_not_redelivered() {
    let h = Harness::new();
    let customer = fixtures::customer();
    h.service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    let worker = h.worker();
    worker.drain().await.unwrap();
    let second = worker.drain().await.unwrap();

    assert_eq!(second.claimed, 0);
    assert_eq!(h.recorder.count("order.created"), 1);
}

#[tokio::test]
async fn webhook_events_flow_through_the_outbox() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let (order, _) = h.order_with_payment(&customer, "pi_hook").await.unwrap();
    let body = fixtures::payment_intent_event("evt_hook", "payment_intent.succeeded", "pi_hook", order.id);
    h.deliver(&body).await.unwrap();

    h.worker().drain().await.unwrap();

    let types = h.recorder.event_types();
    for expected in ["payment.succeeded", "order.paid", "order.status_changed"] {
        assert!(types.iter().any(|t| t == expected), "missing {expected} in {types:?}");
    }
    let paid = h
        .recorder
        .envelopes()
        .into_iter()
        .find(|e| e.event_type == "order.paid")
        .and_then(|e| e.domain_event())
        .unwrap();
    assert_eq!(paid.order_id(), order.id);
}

#[tokio::test]
async fn failing_handler_exhausts_retries_and_stays_queryable() {
    let h = Harness::new();
    let failing = Arc::new(FailingHandler::always());
    h.bus.subscribe("order.created", failing.clone());

    let customer = fixtures::customer();
    h.service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    let message = h.store.outbox_messages().await.remove(0);

    let worker = h.worker();
    let max_retries = worker.config().retry.max_retries;
    let mut last = None;
    for _ in 0..max_retries {
        let claimed = h
            .store
            .claim_due(worker.worker_id(), 10, Duration::from_secs(30), Utc::now())
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        last = Some(worker.process_message(&claimed[0]).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(last, Some(Delivery::Failed { retry_count: max_retries }));
    assert_eq!(failing.calls(), max_retries as usize);

    let stored = h.store.get(message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.retry_count, max_retries);
    assert!(stored.error.as_deref().unwrap_or_default().contains("failing"));

    // Never claimed again.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(worker.drain().await.unwrap().claimed, 0);

    let failed = h.store.failed(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, message.id);
    assert_eq!(h.store.stats().await.unwrap().failed, 1);
}

#[tokio::test]
async fn requeued_message_is_delivered() {
    let h = Harness::new();
    let failing = Arc::new(FailingHandler::failing(3));
    h.bus.subscribe("order.created", failing.clone());

    let customer = fixtures::customer();
    h.service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    let worker = h.worker();
    for _ in 0..3 {
        worker.drain().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let failed = h.store.failed(10).await.unwrap();
    assert_eq!(failed.len(), 1);

    assert!(h.store.requeue(failed[0].id, Utc::now()).await.unwrap());
    assert!(!h.store.requeue(failed[0].id, Utc::now()).await.unwrap());

    let report = worker.drain().await.unwrap();
    assert_eq!(report.processed, 1);
    let stored = h.store.get(failed[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Processed);
    assert_eq!(failing.calls(), 4);
}

#[tokio::test]
async fn delivered_status_change_evicts_cached_order() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let staff = fixtures::manager();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    h.service.get_order(&customer, order.id).await.unwrap();
    assert!(h.cache.get(&order.id).is_some());

    let payment = h
        .service
        .create_payment(&customer, order.id, PaymentProvider::Stripe, "pi_cache")
        .await
        .unwrap();
    h.service.get_order(&customer, order.id).await.unwrap();

    // The webhook writes behind the service's back; only the outbox tells the cache.
    let body = fixtures::payment_intent_event("evt_cache", "payment_intent.succeeded", "pi_cache", order.id);
    h.deliver(&body).await.unwrap();
    assert!(h.cache.get(&order.id).is_some());

    h.worker().drain().await.unwrap();
    assert!(h.cache.get(&order.id).is_none());

    let fresh = h.service.get_order(&customer, order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Processing);
    assert_eq!(payment.order_id, order.id);

    let shipped = h
        .service
        .update_order_status(&staff, order.id, OrderStatus::Shipped, None)
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn retention_sweep_keeps_recent_and_unprocessed_messages() {
    let h = Harness::new();
    let customer = fixtures::customer();
    h.service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    h.worker().drain().await.unwrap();
    h.service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    let purged = h.worker().sweep_retention().await.unwrap();
    assert_eq!(purged, 0);

    let future_cutoff = Utc::now() + chrono::Duration::seconds(1);
    let purged = h.store.purge_processed(future_cutoff).await.unwrap();
    assert_eq!(purged, 1);

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.pending, 1);
}
