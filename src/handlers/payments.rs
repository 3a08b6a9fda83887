use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::UserId;
use crate::{
    entities::PaymentModel,
    errors::ServiceError,
    services::settlement::SettlementStateView,
    ApiResponse, AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments/intent", post(create_intent))
        .route("/payments/verify", post(verify_capture))
        .route("/payments/:gateway_order_id/state", get(settlement_state))
}

/// Capture callback payload posted by the gateway.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCaptureRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyCaptureResponse {
    pub status: String,
    #[schema(value_type = String)]
    pub order_id: uuid::Uuid,
}

/// Open a payment intent for the user's cart
#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    responses(
        (status = 201, description = "Intent created (or reused)"),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn create_intent(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<(StatusCode, Json<ApiResponse<PaymentModel>>), ServiceError> {
    let snapshot = state.services.carts.snapshot(user_id).await?;
    let payment = state.services.payments.create_intent(&snapshot).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

/// Gateway capture callback: verifies the signature and drives settlement
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyCaptureRequest,
    responses(
        (status = 200, description = "Capture settled"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 422, description = "Out of stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn verify_capture(
    State(state): State<AppState>,
    Json(request): Json<VerifyCaptureRequest>,
) -> Result<Json<ApiResponse<VerifyCaptureResponse>>, ServiceError> {
    let outcome = state
        .services
        .settlement
        .process_capture(
            &request.gateway_order_id,
            &request.gateway_payment_id,
            &request.signature,
        )
        .await?;

    Ok(Json(ApiResponse::success(VerifyCaptureResponse {
        status: "success".to_string(),
        order_id: outcome.order.id,
    })))
}

/// Reconciliation view of a checkout attempt
#[utoipa::path(
    get,
    path = "/api/v1/payments/{gateway_order_id}/state",
    params(("gateway_order_id" = String, Path, description = "Gateway order ID")),
    responses(
        (status = 200, description = "Settlement state", body = SettlementStateView),
        (status = 404, description = "Unknown gateway order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn settlement_state(
    State(state): State<AppState>,
    Path(gateway_order_id): Path<String>,
) -> Result<Json<ApiResponse<SettlementStateView>>, ServiceError> {
    let view = state
        .services
        .settlement
        .settlement_state(&gateway_order_id)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}
