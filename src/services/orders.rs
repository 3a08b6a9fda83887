use crate::{
    entities::{
        cart_item, order, order_item, CartItem, Order, OrderItem, OrderModel, OrderStatus,
        PaymentModel, PaymentRef, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::CartSnapshot,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Order Assembler: materializes the durable record of a completed sale.
///
/// Runs only after stock has been committed for a captured payment. The
/// unique index on `orders.payment_id` backs the `AlreadySettled` guard
/// against duplicate callback processing.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

#[derive(Debug, Validate)]
struct AddressInput<'a> {
    #[validate(length(min = 5, max = 300))]
    address: &'a str,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates the order from a captured payment and its cart snapshot, and
    /// deletes the source cart, in one transaction.
    #[instrument(skip(self, payment, snapshot), fields(payment_id = %payment.id))]
    pub async fn assemble(
        &self,
        payment: &PaymentModel,
        snapshot: &CartSnapshot,
        address: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        if payment.status != PaymentStatus::Captured {
            return Err(ServiceError::PaymentNotCaptured);
        }

        if self.find_by_payment_id(payment.id).await?.is_some() {
            return Err(ServiceError::AlreadySettled);
        }

        // The payment settles exactly the snapshot it was opened against.
        if payment.amount != snapshot.cart.total_price {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment amount {} does not match cart total {}",
                payment.amount, snapshot.cart.total_price
            )));
        }

        if let Some(addr) = address.as_deref() {
            AddressInput { address: addr }.validate()?;
        }

        let txn = self.db.begin().await?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(snapshot.cart.user_id),
            total_price: Set(snapshot.cart.total_price),
            address: Set(address),
            status: Set(OrderStatus::Pending),
            payment_id: Set(payment.id),
            is_paid: Set(true),
            paid_at: Set(Some(now)),
            is_delivered: Set(false),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        for item in &snapshot.items {
            let order_item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                created_at: Set(now),
            };
            order_item.insert(&txn).await?;
        }

        // The cart's lifecycle ends here.
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(snapshot.cart.id))
            .exec(&txn)
            .await?;
        crate::entities::Cart::delete_by_id(snapshot.cart.id)
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                payment_id: payment.id,
                total_price: order.total_price,
            })
            .await;

        info!(%order_id, "order assembled");
        Ok(order)
    }

    /// Attaches a delivery address to an existing order.
    #[instrument(skip(self, address))]
    pub async fn set_address(
        &self,
        order_id: Uuid,
        address: String,
    ) -> Result<OrderModel, ServiceError> {
        AddressInput { address: &address }.validate()?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut active: order::ActiveModel = order.into();
        active.address = Set(Some(address));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Fetches an order with its items and resolved payment.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let payment = PaymentRef::from(order.payment_id)
            .resolve(&*self.db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }

    pub async fn find_by_payment_id(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?)
    }
}

/// Order with line items and its resolved payment record.
#[derive(Debug, Serialize)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
    pub payment: PaymentModel,
}
