use crate::{
    entities::{OrderModel, PaymentModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{CartService, OrderService, PaymentService, StockService},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Settlement driver: the authority for "what step comes next" and "what to
/// do on failure" once a capture callback arrives.
///
/// The committing steps run strictly in this order: mark the payment
/// captured, decrement stock, create the order. Decrementing before
/// verification would allow unauthenticated stock drain; creating the order
/// before the stock commit would sell unavailable inventory.
#[derive(Clone)]
pub struct SettlementService {
    event_sender: EventSender,
    payments: Arc<PaymentService>,
    carts: Arc<CartService>,
    stock: Arc<StockService>,
    orders: Arc<OrderService>,
}

impl SettlementService {
    pub fn new(
        event_sender: EventSender,
        payments: Arc<PaymentService>,
        carts: Arc<CartService>,
        stock: Arc<StockService>,
        orders: Arc<OrderService>,
    ) -> Self {
        Self {
            event_sender,
            payments,
            carts,
            stock,
            orders,
        }
    }

    /// Processes a gateway capture callback end to end.
    ///
    /// Idempotent: receiving the same callback N times produces exactly one
    /// order; replays after settlement return the existing order.
    #[instrument(skip(self, signature))]
    pub async fn process_capture(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<SettlementOutcome, ServiceError> {
        let payment = self
            .payments
            .verify_capture(gateway_order_id, gateway_payment_id, signature)
            .await?;

        self.settle(payment).await
    }

    /// Browser-redirect confirmation path. Re-validates the capture with the
    /// same verification contract as the callback, plus a cart-ownership
    /// check, then settles if the asynchronous callback has not landed yet.
    #[instrument(skip(self, signature))]
    pub async fn confirm(
        &self,
        user_id: Uuid,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<SettlementOutcome, ServiceError> {
        let payment = self
            .payments
            .verify_capture(gateway_order_id, gateway_payment_id, signature)
            .await?;

        if let Some(order) = self.orders.find_by_payment_id(payment.id).await? {
            if order.user_id != user_id {
                return Err(ServiceError::NotFound(format!(
                    "Order for gateway order {} not found",
                    gateway_order_id
                )));
            }
            return Ok(SettlementOutcome {
                payment,
                order,
                replayed: true,
            });
        }

        let snapshot = self.carts.snapshot_by_cart_id(payment.cart_id).await?;
        if snapshot.cart.user_id != user_id {
            return Err(ServiceError::NotFound(format!(
                "Cart for gateway order {} not found",
                gateway_order_id
            )));
        }

        self.settle(payment).await
    }

    /// Reconciliation view: where a checkout attempt sits in the pipeline.
    /// `PaymentCaptured` without an order is the recoverable inconsistent
    /// state operators must act on (retry assembly or refund).
    #[instrument(skip(self))]
    pub async fn settlement_state(
        &self,
        gateway_order_id: &str,
    ) -> Result<SettlementStateView, ServiceError> {
        let payment = self
            .payments
            .find_by_gateway_order_id(gateway_order_id)
            .await?;
        let order = self.orders.find_by_payment_id(payment.id).await?;

        let state = match (payment.status, &order) {
            (_, Some(_)) => SettlementState::OrderCreated,
            (PaymentStatus::Created | PaymentStatus::Authorized, None) => {
                SettlementState::IntentCreated
            }
            (PaymentStatus::Captured, None) => SettlementState::PaymentCaptured,
            (PaymentStatus::Failed, None) => SettlementState::PaymentFailed,
            (PaymentStatus::Refunded, None) => SettlementState::Refunded,
            (PaymentStatus::Cancelled, None) => SettlementState::Cancelled,
        };

        Ok(SettlementStateView {
            gateway_order_id: gateway_order_id.to_string(),
            state,
            payment_id: payment.id,
            payment_status: payment.status,
            order_id: order.map(|o| o.id),
        })
    }

    /// Runs the committing steps for an already-captured payment: stock
    /// commit, then order assembly, with compensation on assembly failure.
    async fn settle(&self, payment: PaymentModel) -> Result<SettlementOutcome, ServiceError> {
        // Replay after a completed settlement: the cart is gone and the
        // order exists.
        if let Some(order) = self.orders.find_by_payment_id(payment.id).await? {
            return Ok(SettlementOutcome {
                payment,
                order,
                replayed: true,
            });
        }

        let snapshot = self.carts.snapshot_by_cart_id(payment.cart_id).await?;
        let lines = snapshot.lines();

        if let Err(err) = self.stock.commit(payment.id, &lines).await {
            // Payment stays captured with no order: visible to
            // reconciliation, never silently resolved.
            self.event_sender
                .send_or_log(Event::SettlementFailed {
                    gateway_order_id: payment.gateway_order_id.clone(),
                    reason: err.to_string(),
                })
                .await;
            return Err(err);
        }

        match self.orders.assemble(&payment, &snapshot, None).await {
            Ok(order) => Ok(SettlementOutcome {
                payment,
                order,
                replayed: false,
            }),
            Err(ServiceError::AlreadySettled) => {
                // A concurrent settlement won; our decrements are surplus.
                self.stock.restore(payment.id, &lines).await?;
                let order = self
                    .orders
                    .find_by_payment_id(payment.id)
                    .await?
                    .ok_or(ServiceError::AlreadySettled)?;
                Ok(SettlementOutcome {
                    payment,
                    order,
                    replayed: true,
                })
            }
            Err(err) => {
                warn!(payment_id = %payment.id, error = %err, "assembly failed; compensating stock");
                self.stock.restore(payment.id, &lines).await?;
                self.event_sender
                    .send_or_log(Event::SettlementFailed {
                        gateway_order_id: payment.gateway_order_id.clone(),
                        reason: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }
}

/// Result of a settlement run.
#[derive(Debug, Serialize)]
pub struct SettlementOutcome {
    pub payment: PaymentModel,
    pub order: OrderModel,
    /// True when this call observed an already-completed settlement.
    pub replayed: bool,
}

/// Pipeline position of a checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    IntentCreated,
    PaymentCaptured,
    PaymentFailed,
    OrderCreated,
    Refunded,
    Cancelled,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementStateView {
    pub gateway_order_id: String,
    pub state: SettlementState,
    pub payment_id: Uuid,
    #[schema(value_type = String)]
    pub payment_status: PaymentStatus,
    pub order_id: Option<Uuid>,
}
