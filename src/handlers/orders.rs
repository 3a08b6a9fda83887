use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::OrderModel,
    errors::ServiceError,
    services::orders::OrderDetails,
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/orders/confirm/:user_id/:gateway_order_id/:gateway_payment_id/:signature",
            get(confirm_order),
        )
        .route("/orders/:order_id/address", post(set_address))
        .route("/orders/:order_id", get(get_order))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetAddressRequest {
    pub address: String,
}

/// Browser-redirect confirmation: re-validates the capture before
/// materializing the order
#[utoipa::path(
    get,
    path = "/api/v1/orders/confirm/{user_id}/{gateway_order_id}/{gateway_payment_id}/{signature}",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("gateway_order_id" = String, Path, description = "Gateway order ID"),
        ("gateway_payment_id" = String, Path, description = "Gateway payment ID"),
        ("signature" = String, Path, description = "Capture signature")
    ),
    responses(
        (status = 200, description = "Order confirmed"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 422, description = "Payment not captured or out of stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn confirm_order(
    State(state): State<AppState>,
    Path((user_id, gateway_order_id, gateway_payment_id, signature)): Path<(
        Uuid,
        String,
        String,
        String,
    )>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let outcome = state
        .services
        .settlement
        .confirm(user_id, &gateway_order_id, &gateway_payment_id, &signature)
        .await?;
    Ok(Json(ApiResponse::success(outcome.order)))
}

/// Attach a delivery address to an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/address",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = SetAddressRequest,
    responses(
        (status = 200, description = "Address saved"),
        (status = 400, description = "Invalid address", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn set_address(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<SetAddressRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .set_address(order_id, request.address)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Fetch an order with items and resolved payment
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let details = state.services.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(details)))
}
