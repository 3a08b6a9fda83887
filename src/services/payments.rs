use crate::{
    entities::{payment, Payment, PaymentMethod, PaymentModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{self, PaymentGateway},
    services::carts::CartSnapshot,
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Payment Intent Manager and Payment Verifier.
///
/// Opens gateway intents against a cart snapshot, persists the pending
/// payment record, and authenticates the gateway's capture callback. The
/// `created -> captured` transition is applied as a conditional update so a
/// concurrent duplicate callback cannot capture twice.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: Arc<dyn PaymentGateway>,
    gateway_secret: String,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        gateway_secret: String,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            gateway_secret,
            currency,
        }
    }

    /// Opens a payment intent for the cart snapshot. The amount is the
    /// snapshot total expressed in the gateway's minor currency unit.
    ///
    /// Idempotent at the payment layer: an existing uncaptured payment for
    /// the same cart is reused rather than duplicated, so a user retrying
    /// checkout does not orphan intents. Reuse requires the amount to still
    /// match the cart total; if the cart changed since the intent was
    /// opened, the stale intent is cancelled and a fresh one issued so the
    /// gateway can never capture an amount the assembler will reject.
    #[instrument(skip(self, snapshot), fields(cart_id = %snapshot.cart.id))]
    pub async fn create_intent(
        &self,
        snapshot: &CartSnapshot,
    ) -> Result<PaymentModel, ServiceError> {
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let existing = Payment::find()
            .filter(payment::Column::CartId.eq(snapshot.cart.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Created))
            .one(&*self.db)
            .await?;

        if let Some(payment) = existing {
            if payment.amount == snapshot.cart.total_price {
                info!(payment_id = %payment.id, "reusing uncaptured payment intent");
                return Ok(payment);
            }

            warn!(
                payment_id = %payment.id,
                stale_amount = %payment.amount,
                cart_total = %snapshot.cart.total_price,
                "cart total changed; superseding stale payment intent"
            );
            let mut stale: payment::ActiveModel = payment.into();
            stale.status = Set(PaymentStatus::Cancelled);
            stale.updated_at = Set(Utc::now());
            stale.update(&*self.db).await?;
        }

        let amount_minor = to_minor_units(snapshot.cart.total_price)?;
        let intent = self
            .gateway
            .create_intent(amount_minor, &self.currency)
            .await?;

        let payment_id = Uuid::new_v4();
        let payment = payment::ActiveModel {
            id: Set(payment_id),
            cart_id: Set(snapshot.cart.id),
            amount: Set(snapshot.cart.total_price),
            currency: Set(intent.currency.clone()),
            method: Set(PaymentMethod::Other),
            status: Set(PaymentStatus::Created),
            transaction_id: Set(format!("txn_{}", Uuid::new_v4().simple())),
            gateway_order_id: Set(intent.gateway_order_id.clone()),
            gateway_payment_id: Set(None),
            signature: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        let payment = payment.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                payment_id,
                gateway_order_id: intent.gateway_order_id,
                amount_minor,
            })
            .await;

        info!(payment_id = %payment.id, amount_minor, "created payment intent");
        Ok(payment)
    }

    /// Authenticates a capture callback and transitions the payment
    /// `created -> captured`.
    ///
    /// A replayed callback for an already-captured payment with the same
    /// gateway payment id is a no-op success. A signature mismatch leaves the
    /// payment untouched: an ambiguous network replay must not poison a
    /// legitimate retry by marking the record failed.
    #[instrument(skip(self, signature))]
    pub async fn verify_capture(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self.find_by_gateway_order_id(gateway_order_id).await?;

        if payment.status == PaymentStatus::Captured {
            return if payment.gateway_payment_id.as_deref() == Some(gateway_payment_id) {
                info!(%gateway_order_id, "capture callback replayed; no-op");
                Ok(payment)
            } else {
                warn!(%gateway_order_id, "captured payment replayed with different payment id");
                Err(ServiceError::InvalidSignature)
            };
        }

        if !payment.status.can_transition_to(PaymentStatus::Captured) {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment {} cannot be captured from state {:?}",
                payment.id, payment.status
            )));
        }

        if !gateway::verify_capture_signature(
            &self.gateway_secret,
            gateway_order_id,
            gateway_payment_id,
            signature,
        ) {
            self.event_sender
                .send_or_log(Event::PaymentVerificationFailed {
                    gateway_order_id: gateway_order_id.to_string(),
                })
                .await;
            return Err(ServiceError::InvalidSignature);
        }

        // Conditional transition: only one caller may move created -> captured.
        let result = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Captured))
            .col_expr(
                payment::Column::GatewayPaymentId,
                Expr::value(Some(gateway_payment_id.to_string())),
            )
            .col_expr(
                payment::Column::Signature,
                Expr::value(Some(signature.to_string())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Created))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race to a concurrent callback; accept if it captured
            // the same gateway payment id.
            let current = self.find_by_gateway_order_id(gateway_order_id).await?;
            return if current.status == PaymentStatus::Captured
                && current.gateway_payment_id.as_deref() == Some(gateway_payment_id)
            {
                Ok(current)
            } else {
                Err(ServiceError::ConditionalUpdateConflict(format!(
                    "payment {}",
                    payment.id
                )))
            };
        }

        let captured = self.find_by_gateway_order_id(gateway_order_id).await?;
        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                payment_id: captured.id,
                gateway_order_id: gateway_order_id.to_string(),
            })
            .await;

        info!(payment_id = %captured.id, %gateway_order_id, "payment captured");
        Ok(captured)
    }

    /// Marks a stale uncaptured payment failed. Used by reconciliation
    /// tooling when the gateway reports an intent as dead; a late-arriving
    /// valid callback after this point is rejected by the state machine.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, gateway_order_id: &str) -> Result<PaymentModel, ServiceError> {
        let payment = self.find_by_gateway_order_id(gateway_order_id).await?;

        if !payment.status.can_transition_to(PaymentStatus::Failed) {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment {} cannot fail from state {:?}",
                payment.id, payment.status
            )));
        }

        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Failed);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<PaymentModel, ServiceError> {
        Payment::find()
            .filter(payment::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment for gateway order {} not found",
                    gateway_order_id
                ))
            })
    }
}

/// Converts a decimal major-unit amount into the gateway's integer minor
/// units (e.g. 200.00 -> 20000).
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .trunc()
        .to_i64()
        .filter(|minor| *minor >= 0)
        .ok_or_else(|| {
            ServiceError::InternalError(format!("amount {} not representable in minor units", amount))
        })
}
