use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::UserId;
use crate::{
    entities::CartModel,
    errors::ServiceError,
    services::carts::CartView,
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/carts", get(get_cart))
        .route("/carts/items", post(add_item))
        .route("/carts/items/:product_id", delete(remove_item))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Current user's cart with resolved product lines
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    responses(
        (status = 200, description = "Cart contents"),
        (status = 404, description = "No cart for this user", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
async fn get_cart(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<ApiResponse<CartView>>, ServiceError> {
    let view = state.services.carts.cart_view(user_id).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// Add a product to the cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
async fn add_item(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartModel>>), ServiceError> {
    let cart = state
        .services
        .carts
        .add_item(user_id, request.product_id, request.quantity)
        .await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(cart))))
}

/// Remove a product's line item from the cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Item removed"),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
async fn remove_item(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartModel>>, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(user_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}
