//! HTTP surface for the checkout and settlement pipeline.

pub mod carts;
pub mod orders;
pub mod payments;

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    gateway::PaymentGateway,
    services::{CartService, OrderService, PaymentService, SettlementService, StockService},
};

/// Service bundle shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub payments: Arc<PaymentService>,
    pub stock: Arc<StockService>,
    pub orders: Arc<OrderService>,
    pub settlement: Arc<SettlementService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let carts = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            event_sender.clone(),
            gateway,
            config.gateway_secret.clone(),
            config.currency.clone(),
        ));
        let stock = Arc::new(StockService::new(
            db.clone(),
            event_sender.clone(),
            config.stock_commit_retries,
        ));
        let orders = Arc::new(OrderService::new(db, event_sender.clone()));
        let settlement = Arc::new(SettlementService::new(
            event_sender,
            payments.clone(),
            carts.clone(),
            stock.clone(),
            orders.clone(),
        ));

        Self {
            carts,
            payments,
            stock,
            orders,
            settlement,
        }
    }
}

/// Authenticated-user identity, threaded explicitly into every pipeline
/// call. The external identity provider terminates authentication upstream
/// and forwards the opaque user id in the `X-User-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ServiceError::ValidationError("Missing X-User-Id header".to_string())
            })?;

        let user_id = Uuid::parse_str(header).map_err(|_| {
            ServiceError::ValidationError("X-User-Id must be a UUID".to_string())
        })?;

        Ok(UserId(user_id))
    }
}
