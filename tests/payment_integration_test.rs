//! Payment intent and capture-verification tests.

mod common;

use axum::{body, http::Method, response::Response};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use std::str::FromStr;
use storefront_api::entities::{Order, Payment, PaymentStatus};
use uuid::Uuid;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn decimal(value: &Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal string")).expect("decimal value")
}

#[tokio::test]
async fn intent_is_reused_while_uncaptured() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Kettle", dec!(40.00), 10).await;

    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let first = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    let second = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;

    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(
        first["data"]["gateway_order_id"],
        second["data"]["gateway_order_id"]
    );

    let payments = Payment::find().all(&*app.state.db).await.expect("payments");
    assert_eq!(payments.len(), 1);
}

/// Changing the cart after an intent was opened must not reuse the stale
/// amount: the gateway would capture the wrong total and the assembler's
/// amount cross-check would strand the payment captured with no order.
#[tokio::test]
async fn changed_cart_supersedes_stale_intent() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Bowl", dec!(10.00), 10).await;

    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let stale = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    let stale_id = stale["data"]["id"].as_str().expect("payment id").to_string();
    assert_eq!(decimal(&stale["data"]["amount"]), dec!(10.00));

    // Cart grows after the intent was opened.
    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let fresh = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    assert_ne!(fresh["data"]["id"].as_str().expect("payment id"), stale_id);
    assert_eq!(decimal(&fresh["data"]["amount"]), dec!(20.00));

    let stale_payment = Payment::find_by_id(Uuid::parse_str(&stale_id).expect("uuid"))
        .one(&*app.state.db)
        .await
        .expect("query payment")
        .expect("payment exists");
    assert_eq!(stale_payment.status, PaymentStatus::Cancelled);

    // The fresh intent settles cleanly at the current total.
    let gateway_order_id = fresh["data"]["gateway_order_id"]
        .as_str()
        .expect("gateway order id")
        .to_string();
    let (gateway_payment_id, signature) = app.simulate_capture(&gateway_order_id);
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            None,
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": gateway_payment_id,
                "signature": signature,
            })),
        )
        .await;
    assert_eq!(response.status(), 200);

    let orders = Order::find().all(&*app.state.db).await.expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total_price, dec!(20.00));
}

#[tokio::test]
async fn intent_on_empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();

    let response = app
        .request_as(Method::POST, "/api/v1/payments/intent", user, None)
        .await;
    assert_eq!(response.status(), 404);

    // A cart whose only line was removed is empty, not missing.
    let product = app.seed_product("Spoon", dec!(2.00), 10).await;
    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;
    app.request_as(
        Method::DELETE,
        &format!("/api/v1/carts/items/{}", product.id),
        user,
        None,
    )
    .await;

    let response = app
        .request_as(Method::POST, "/api/v1/payments/intent", user, None)
        .await;
    assert_eq!(response.status(), 400);
}

/// A forged signature must be rejected without touching the payment record
/// or stock.
#[tokio::test]
async fn forged_signature_is_rejected_and_nothing_settles() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Teapot", dec!(60.00), 5).await;

    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let intent = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    let gateway_order_id = intent["data"]["gateway_order_id"]
        .as_str()
        .expect("gateway order id")
        .to_string();

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            None,
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_forged",
                "signature": "deadbeef",
            })),
        )
        .await;
    assert_eq!(response.status(), 401);

    let payment = app
        .state
        .services
        .payments
        .find_by_gateway_order_id(&gateway_order_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Created);
    assert!(payment.gateway_payment_id.is_none());
    assert!(payment.signature.is_none());

    let orders = Order::find().all(&*app.state.db).await.expect("orders");
    assert!(orders.is_empty());

    let state = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/payments/{}/state", gateway_order_id),
            None,
            None,
        )
        .await,
    )
    .await;
    assert_eq!(state["data"]["state"], "intent_created");
}

/// After a capture, a callback carrying a different gateway payment id is an
/// attack or a gateway fault, not a replay.
#[tokio::test]
async fn captured_payment_rejects_mismatched_payment_id() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Tray", dec!(15.00), 5).await;

    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let intent = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    let gateway_order_id = intent["data"]["gateway_order_id"]
        .as_str()
        .expect("gateway order id")
        .to_string();

    let (gateway_payment_id, signature) = app.simulate_capture(&gateway_order_id);
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            None,
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": gateway_payment_id,
                "signature": signature,
            })),
        )
        .await;
    assert_eq!(response.status(), 200);

    // Second callback, validly signed but for a different payment id.
    let (other_payment_id, other_signature) = app.simulate_capture(&gateway_order_id);
    assert_ne!(gateway_payment_id, other_payment_id);
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            None,
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": other_payment_id,
                "signature": other_signature,
            })),
        )
        .await;
    assert_eq!(response.status(), 401);

    let payment = app
        .state
        .services
        .payments
        .find_by_gateway_order_id(&gateway_order_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.gateway_payment_id.as_deref(), Some(gateway_payment_id.as_str()));
}

#[tokio::test]
async fn failed_payment_is_terminal() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Vase", dec!(90.00), 2).await;

    app.request_as(
        Method::POST,
        "/api/v1/carts/items",
        user,
        Some(json!({ "product_id": product.id, "quantity": 1 })),
    )
    .await;

    let intent = response_json(
        app.request_as(Method::POST, "/api/v1/payments/intent", user, None)
            .await,
    )
    .await;
    let gateway_order_id = intent["data"]["gateway_order_id"]
        .as_str()
        .expect("gateway order id")
        .to_string();

    let failed = app
        .state
        .services
        .payments
        .mark_failed(&gateway_order_id)
        .await
        .expect("mark failed");
    assert_eq!(failed.status, PaymentStatus::Failed);

    // A valid capture callback can no longer resurrect the attempt.
    let (gateway_payment_id, signature) = app.simulate_capture(&gateway_order_id);
    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/verify",
            None,
            Some(json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": gateway_payment_id,
                "signature": signature,
            })),
        )
        .await;
    assert_ne!(response.status(), 200);

    let state = response_json(
        app.request(
            Method::GET,
            &format!("/api/v1/payments/{}/state", gateway_order_id),
            None,
            None,
        )
        .await,
    )
    .await;
    assert_eq!(state["data"]["state"], "payment_failed");
}
