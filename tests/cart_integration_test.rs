//! Integration tests for the cart ledger: add, merge, remove, totals.

mod common;

use axum::{body, http::Method, response::Response};
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use std::str::FromStr;
use storefront_api::entities::Product;
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
async fn add_item_creates_cart_and_snapshots_price() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Walnut Desk", dec!(149.50), 10).await;

    let response = app
        .request_as(
            Method::POST,
            "/api/v1/carts/items",
            user,
            Some(json!({ "product_id": product.id, "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(decimal(&body["data"]["total_price"]), dec!(299.00));

    let view = app
        .request_as(Method::GET, "/api/v1/carts", user, None)
        .await;
    assert_eq!(view.status(), 200);
    let view = response_json(view).await;
    let lines = view["data"]["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["quantity"], 2);
    assert_eq!(decimal(&lines[0]["unit_price"]), dec!(149.50));
    assert_eq!(decimal(&lines[0]["line_total"]), dec!(299.00));
}

#[tokio::test]
async fn adding_same_product_merges_into_one_line() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Mug", dec!(8.00), 100).await;

    for _ in 0..3 {
        let response = app
            .request_as(
                Method::POST,
                "/api/v1/carts/items",
                user,
                Some(json!({ "product_id": product.id })),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    let view = response_json(
        app.request_as(Method::GET, "/api/v1/carts", user, None)
            .await,
    )
    .await;
    let lines = view["data"]["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["quantity"], 3);
    assert_eq!(decimal(&view["data"]["total_price"]), dec!(24.00));
}

#[tokio::test]
async fn remove_item_drops_line_and_returns_one_unit_to_stock() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Lamp", dec!(30.00), 5).await;
    let other = app.seed_product("Shade", dec!(12.00), 5).await;

    for id in [product.id, other.id] {
        let response = app
            .request_as(
                Method::POST,
                "/api/v1/carts/items",
                user,
                Some(json!({ "product_id": id, "quantity": 2 })),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    let response = app
        .request_as(
            Method::DELETE,
            &format!("/api/v1/carts/items/{}", product.id),
            user,
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(decimal(&body["data"]["total_price"]), dec!(24.00));

    let refreshed = Product::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .expect("query product")
        .expect("product exists");
    assert_eq!(refreshed.stock, 6);
}

#[tokio::test]
async fn unknown_product_and_missing_cart_yield_not_found() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();

    let response = app
        .request_as(
            Method::POST,
            "/api/v1/carts/items",
            user,
            Some(json!({ "product_id": Uuid::new_v4(), "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status(), 404);

    let response = app
        .request_as(Method::GET, "/api/v1/carts", user, None)
        .await;
    assert_eq!(response.status(), 404);

    let response = app
        .request_as(
            Method::DELETE,
            &format!("/api/v1/carts/items/{}", Uuid::new_v4()),
            user,
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn missing_user_header_is_rejected() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/carts", None, None).await;
    assert_eq!(response.status(), 400);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("X-User-Id"));
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let app = TestApp::new().await;
    let user = Uuid::new_v4();
    let product = app.seed_product("Chair", dec!(75.00), 4).await;

    let response = app
        .request_as(
            Method::POST,
            "/api/v1/carts/items",
            user,
            Some(json!({ "product_id": product.id, "quantity": 0 })),
        )
        .await;
    assert_eq!(response.status(), 400);
}
