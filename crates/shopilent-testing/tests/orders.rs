use shopilent_core::domain::{OrderStatus, PaymentProvider, PaymentStatus};
use shopilent_core::{CommerceStore, ErrorKind, ShopilentError};
use shopilent_testing::{fixtures, Harness};

#[tokio::test]
async fn create_order_persists_and_records_event() {
    let h = Harness::new();
    let customer = fixtures::customer();

    let order = h
        .service
        .create_order(&customer, fixtures::items(), "eur")
        .await
        .unwrap();

    assert_eq!(order.total, 4_000);
    assert_eq!(order.currency, "EUR");
    assert_eq!(order.version, 1);
    assert_eq!(order.user_id, customer.user_id);

    let stored = h.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(h.store.outbox_events().await, vec!["order.created"]);
}

#[tokio::test]
async fn invalid_orders_are_rejected_before_any_write() {
    let h = Harness::new();
    let customer = fixtures::customer();

    let err = h.service.create_order(&customer, vec![], "EUR").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .service
        .create_order(&customer, fixtures::items(), "EURO")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.commit_count(), 0);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let h = Harness::new();
    let owner = fixtures::customer();
    let stranger = fixtures::customer();
    let order = h
        .service
        .create_order(&owner, fixtures::items(), "EUR")
        .await
        .unwrap();

    assert!(h.service.get_order(&owner, order.id).await.is_ok());
    assert!(h.service.get_order(&fixtures::admin(), order.id).await.is_ok());

    let err = h.service.get_order(&stranger, order.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h.service.cancel_order(&stranger, order.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn status_updates_require_staff() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    let err = h
        .service
        .update_order_status(&customer, order.id, OrderStatus::Shipped, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShopilentError::Forbidden(_)));

    let updated = h
        .service
        .update_order_status(&fixtures::manager(), order.id, OrderStatus::Processing, Some(1))
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Processing);
    assert_eq!(updated.version, 2);
}

#[tokio::test]
async fn invalid_transition_is_a_validation_error() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    let err = h
        .service
        .update_order_status(&fixtures::admin(), order.id, OrderStatus::Delivered, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let staff = fixtures::admin();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    h.service
        .update_order_status(&staff, order.id, OrderStatus::Processing, Some(1))
        .await
        .unwrap();
    let err = h
        .service
        .update_order_status(&staff, order.id, OrderStatus::Shipped, Some(1))
        .await
        .unwrap_err();

    assert!(err.is_concurrency_conflict());
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn concurrent_status_updates_let_exactly_one_win() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    h.service
        .update_order_status(&fixtures::admin(), order.id, OrderStatus::Processing, None)
        .await
        .unwrap();

    let a = fixtures::admin();
    let b = fixtures::manager();
    let (first, second) = tokio::join!(
        h.service
            .update_order_status(&a, order.id, OrderStatus::Shipped, Some(2)),
        h.service
            .update_order_status(&b, order.id, OrderStatus::Cancelled, Some(2)),
    );

    let results = [first, second];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_concurrency_conflict()))
        .count();
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(h.store.order(order.id).await.unwrap().unwrap().version, 3);
}

#[tokio::test]
async fn cancel_is_idempotent_and_limited_to_early_states() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let staff = fixtures::manager();

    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    let cancelled = h.service.cancel_order(&customer, order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    let again = h.service.cancel_order(&customer, order.id).await.unwrap();
    assert_eq!(again.version, cancelled.version);

    let shipped = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    for status in [OrderStatus::Processing, OrderStatus::Shipped] {
        h.service
            .update_order_status(&staff, shipped.id, status, None)
            .await
            .unwrap();
    }
    let err = h.service.cancel_order(&customer, shipped.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn payment_registration_rules() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let (order, payment) = h.order_with_payment(&customer, "pi_rules").await.unwrap();
    assert_eq!(payment.amount, order.total);
    assert_eq!(payment.status, PaymentStatus::Pending);

    let err = h
        .service
        .create_payment(&customer, order.id, PaymentProvider::Stripe, "pi_rules")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let body = fixtures::payment_intent_event("evt_rules", "payment_intent.succeeded", "pi_rules", order.id);
    h.deliver(&body).await.unwrap();
    let err = h
        .service
        .create_payment(&customer, order.id, PaymentProvider::Stripe, "pi_second")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let cancelled = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();
    h.service.cancel_order(&customer, cancelled.id).await.unwrap();
    let err = h
        .service
        .create_payment(&customer, cancelled.id, PaymentProvider::Stripe, "pi_late")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let payments = h.service.payments_for_order(&customer, order.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn reads_are_served_from_cache_until_evicted() {
    let h = Harness::new();
    let customer = fixtures::customer();
    let order = h
        .service
        .create_order(&customer, fixtures::items(), "EUR")
        .await
        .unwrap();

    assert!(h.cache.is_empty());
    h.service.get_order(&customer, order.id).await.unwrap();
    assert_eq!(h.cache.len(), 1);

    h.service
        .update_order_status(&fixtures::admin(), order.id, OrderStatus::Processing, None)
        .await
        .unwrap();
    assert!(h.cache.get(&order.id).is_none());

    let fresh = h.service.get_order(&customer, order.id).await.unwrap();
    assert_eq!(fresh.status, OrderStatus::Processing);
}
