mod common;

use axum::http::{Method, StatusCode};
use common::{event, TestApp, TEST_WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_billing::{
    entities::{commerce::CartStatus, OrderStatus},
    services::reconciliation::ReconcileOutcome,
    webhooks::PaymentEvent,
};
use uuid::Uuid;

struct CheckedOut {
    user_id: Uuid,
    order_id: Uuid,
    session_id: String,
}

/// Seeds a user with one monthly item and runs checkout
async fn checked_out(app: &TestApp, email: &str) -> CheckedOut {
    let user = app.seed_user(email).await;
    let product = app.seed_product("alpha", Some(dec!(12.50)), None).await;
    let token = app.token_for(user.id);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/cart/add",
            Some(&token),
            Some(json!({ "product_id": product.id, "plan": "monthly" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(Method::POST, "/api/v1/payments/checkout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    CheckedOut {
        user_id: user.id,
        order_id: body["order_id"].as_str().unwrap().parse().unwrap(),
        session_id: body["session_id"].as_str().unwrap().to_string(),
    }
}

async fn link_customer(app: &TestApp, email: &str, customer_id: &str) {
    let (status, body) = app
        .webhook(
            &event("customer.created", json!({ "id": customer_id, "email": email })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
}

#[tokio::test]
async fn invoice_paid_settles_order_and_clears_cart() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "alice@shop.test").await;

    let order = app.order(flow.order_id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total, dec!(12.50));

    link_customer(&app, "alice@shop.test", "cus_alice").await;
    assert_eq!(
        app.user(flow.user_id).await.billing_customer_id.as_deref(),
        Some("cus_alice")
    );

    let invoice = event("invoice.paid", json!({ "id": "in_1", "customer": "cus_alice" }));
    let (status, _) = app.webhook(&invoice, None).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Paid);
    assert!(app.user(flow.user_id).await.outstanding_session_id.is_none());
    let cart = app.state.services.cart.get_cart(flow.user_id).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.status, CartStatus::Ready);

    // Replay: still acknowledged, nothing moves
    let (status, body) = app.webhook(&invoice, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    let order = app.order(flow.order_id).await;
    assert_eq!(order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn redelivered_invoice_is_a_no_op() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "bob@shop.test").await;
    link_customer(&app, "bob@shop.test", "cus_bob").await;

    let reconciler = &app.state.services.reconciler;
    let paid = PaymentEvent::InvoicePaid {
        customer_id: "cus_bob".into(),
    };
    assert_eq!(
        reconciler.handle(Some("evt_invoice_1"), paid.clone()).await.unwrap(),
        ReconcileOutcome::OrderPaid
    );
    assert_eq!(
        reconciler.handle(Some("evt_invoice_1"), paid.clone()).await.unwrap(),
        ReconcileOutcome::Duplicate
    );
    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Paid);

    // A new invoice for the same customer is a separate event
    assert_eq!(
        reconciler.handle(Some("evt_invoice_2"), paid).await.unwrap(),
        ReconcileOutcome::CartCleared
    );
}

#[tokio::test]
async fn redelivered_invoice_keeps_items_added_after_payment() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "nina@shop.test").await;
    link_customer(&app, "nina@shop.test", "cus_nina").await;

    let invoice = event("invoice.paid", json!({ "id": "in_n", "customer": "cus_nina" }));
    app.webhook(&invoice, None).await;
    assert!(app
        .state
        .services
        .cart
        .get_cart(flow.user_id)
        .await
        .unwrap()
        .items
        .is_empty());

    let beta = app.seed_product("beta", Some(dec!(4.00)), None).await;
    let token = app.token_for(flow.user_id);
    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/cart/add",
            Some(&token),
            Some(json!({ "product_id": beta.id, "plan": "monthly" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.webhook(&invoice, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);

    let cart = app.state.services.cart.get_cart(flow.user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].product_id, beta.id);
}

#[tokio::test]
async fn failed_event_can_be_redelivered() {
    let app = TestApp::new().await;
    let reconciler = &app.state.services.reconciler;
    let failed = PaymentEvent::PaymentIntentPaymentFailed {
        session_id: "sess_not_yet_known".into(),
    };

    assert!(reconciler
        .handle(Some("evt_retry"), failed.clone())
        .await
        .is_err());
    // The id was released, so the redelivery is applied rather than skipped
    assert!(reconciler.handle(Some("evt_retry"), failed).await.is_err());
}

#[tokio::test]
async fn async_payment_failure_cancels_and_keeps_cart() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "carol@shop.test").await;

    let failed = event(
        "checkout.session.async_payment_failed",
        json!({ "id": "cs_1", "metadata": { "session_id": flow.session_id } }),
    );
    let (status, _) = app.webhook(&failed, None).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Cancelled);
    assert!(app.user(flow.user_id).await.outstanding_session_id.is_none());
    let cart = app.state.services.cart.get_cart(flow.user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.status, CartStatus::Ready);

    // A late invoice for the customer cannot resurrect the cancelled order
    link_customer(&app, "carol@shop.test", "cus_carol").await;
    app.webhook(
        &event("invoice.paid", json!({ "id": "in_2", "customer": "cus_carol" })),
        None,
    )
    .await;
    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn payment_intent_failure_cancels_by_client_reference() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "dave@shop.test").await;

    let failed = event(
        "payment_intent.payment_failed",
        json!({ "id": "pi_1", "client_reference_id": flow.session_id }),
    );
    let (status, _) = app.webhook(&failed, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Cancelled);
    assert!(app.user(flow.user_id).await.outstanding_session_id.is_none());
    let cart = app.state.services.cart.get_cart(flow.user_id).await.unwrap();
    assert_eq!(cart.status, CartStatus::Ready);
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn cancelling_an_older_checkout_keeps_the_newer_one_pending() {
    let app = TestApp::new().await;
    let first = checked_out(&app, "omar@shop.test").await;
    let token = app.token_for(first.user_id);
    let (status, body) = app
        .request(Method::POST, "/api/v1/payments/checkout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let second_session = body["session_id"].as_str().unwrap().to_string();
    assert_ne!(second_session, first.session_id);

    let failed = event(
        "payment_intent.payment_failed",
        json!({ "id": "pi_old", "client_reference_id": first.session_id }),
    );
    app.webhook(&failed, None).await;

    assert_eq!(app.order(first.order_id).await.status, OrderStatus::Cancelled);
    let cart = app.state.services.cart.get_cart(first.user_id).await.unwrap();
    assert_eq!(cart.status, CartStatus::Pending);
    assert_eq!(
        app.user(first.user_id).await.outstanding_session_id.as_deref(),
        Some(second_session.as_str())
    );
}

#[tokio::test]
async fn terminal_orders_ignore_conflicting_events() {
    let app = TestApp::new().await;
    let flow = checked_out(&app, "erin@shop.test").await;
    link_customer(&app, "erin@shop.test", "cus_erin").await;
    app.webhook(
        &event("invoice.paid", json!({ "id": "in_3", "customer": "cus_erin" })),
        None,
    )
    .await;

    let outcome = app
        .state
        .services
        .reconciler
        .reconcile(PaymentEvent::PaymentIntentPaymentFailed {
            session_id: flow.session_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::AlreadyTerminal);
    assert_eq!(app.order(flow.order_id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn unknown_session_is_still_acknowledged() {
    let app = TestApp::new().await;

    let failed = event(
        "checkout.session.async_payment_failed",
        json!({ "id": "cs_unknown", "metadata": { "session_id": "sess_missing" } }),
    );
    let (status, body) = app.webhook(&failed, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let err = app
        .state
        .services
        .reconciler
        .reconcile(PaymentEvent::CheckoutSessionAsyncPaymentFailed {
            session_id: "sess_missing".into(),
        })
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn placeholders_unknown_and_unmatched_events_are_acknowledged() {
    let app = TestApp::new().await;

    for payload in [
        event("checkout.session.completed", json!({ "id": "cs_9" })),
        event("checkout.session.payment_succeeded", json!({ "id": "cs_9" })),
        event("charge.refunded", json!({ "id": "ch_1" })),
        event("customer.created", json!({ "id": "cus_x", "email": "nobody@shop.test" })),
        event("invoice.paid", json!({ "id": "in_x", "customer": "cus_unknown" })),
    ] {
        let (status, body) = app.webhook(&payload, None).await;
        assert_eq!(status, StatusCode::OK, "payload {}", payload);
        assert_eq!(body["received"], true);
    }
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app.webhook(&json!({ "data": { "object": {} } }), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = app
        .webhook(&json!({ "type": "invoice.paid", "data": { "object": { "id": "in_1" } } }), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signatures_are_enforced_when_a_secret_is_configured() {
    let app = TestApp::with_webhook_secret(Some(TEST_WEBHOOK_SECRET)).await;
    let payload = event("charge.refunded", json!({ "id": "ch_1" }));

    let (status, body) = app.webhook(&payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let (status, _) = app.webhook(&payload, Some("whsec_wrong")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.webhook(&payload, Some(TEST_WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
}
