use crate::{
    entities::{cart, cart_item, product, Cart, CartItem, CartModel, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Cart Ledger: the mutable pre-checkout line-item set for one user.
///
/// Unit prices are snapshotted at add-to-cart time so that settlement is
/// deterministic against the snapshot; `total_price` is recomputed from those
/// snapshots on every mutation and does not track live catalog prices.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Adds a product to the user's cart, creating the cart lazily on first
    /// add. An existing line item for the product is merged by quantity.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartModel, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = match self.active_cart(&txn, user_id).await? {
            Some(cart) => cart,
            None => {
                let cart = cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    total_price: Set(Decimal::ZERO),
                    coupon_code: Set(None),
                    discount: Set(Decimal::ZERO),
                    is_checked_out: Set(false),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                let cart = cart.insert(&txn).await?;
                self.event_sender.send_or_log(Event::CartCreated(cart.id)).await;
                cart
            }
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        if let Some(item) = existing {
            let merged = item.quantity + quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(merged);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                // Price snapshot; later catalog changes do not move this line.
                unit_price: Set(product.price),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        let cart = self.recompute_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;

        info!(cart_id = %cart.id, %product_id, quantity, "added item to cart");
        Ok(cart)
    }

    /// Removes a product's line item from the user's cart and restores one
    /// unit of stock, mirroring the ledger's historical remove semantics.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self
            .active_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No cart for user {}", user_id)))?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not in cart", product_id))
            })?;

        CartItem::delete_by_id(item.id).exec(&txn).await?;

        Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(1),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(&txn)
            .await?;

        let cart = self.recompute_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            })
            .await;

        Ok(cart)
    }

    /// Immutable view of the user's cart used by intent creation. Must not be
    /// mutated once the checkout flow begins.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let cart = self
            .active_cart(&*self.db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No cart for user {}", user_id)))?;
        self.load_snapshot(cart).await
    }

    /// Snapshot addressed by cart id, used by settlement after capture.
    pub async fn snapshot_by_cart_id(&self, cart_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;
        self.load_snapshot(cart).await
    }

    /// Cart page view: line items with resolved product details.
    #[instrument(skip(self))]
    pub async fn cart_view(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let snapshot = self.snapshot(user_id).await?;

        let mut lines = Vec::with_capacity(snapshot.items.len());
        for item in &snapshot.items {
            let product = Product::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            lines.push(CartLineView {
                product_id: product.id,
                name: product.name,
                description: product.description,
                unit_price: item.unit_price,
                quantity: item.quantity,
                line_total: item.line_total(),
            });
        }

        Ok(CartView {
            cart_id: snapshot.cart.id,
            user_id,
            lines,
            discount: snapshot.cart.discount,
            total_price: snapshot.cart.total_price,
        })
    }

    async fn active_cart(
        &self,
        conn: &impl ConnectionTrait,
        user_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::IsCheckedOut.eq(false))
            .one(conn)
            .await?)
    }

    async fn load_snapshot(&self, cart: CartModel) -> Result<CartSnapshot, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&*self.db)
            .await?;
        Ok(CartSnapshot { cart, items })
    }

    /// total_price = Σ snapshot unit_price × quantity − discount
    async fn recompute_total(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let subtotal: Decimal = items.iter().map(|item| item.line_total()).sum();

        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let discount = cart.discount;
        let mut cart: cart::ActiveModel = cart.into();
        cart.total_price = Set(subtotal - discount);
        cart.updated_at = Set(Utc::now());

        Ok(cart.update(conn).await?)
    }
}

/// Immutable cart view handed to the payment and settlement stages.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `(product_id, quantity)` pairs for the stock coordinator.
    pub fn lines(&self) -> Vec<(Uuid, i32)> {
        self.items
            .iter()
            .map(|item| (item.product_id, item.quantity))
            .collect()
    }
}

/// Cart page line with resolved product details.
#[derive(Debug, Serialize)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<CartLineView>,
    pub discount: Decimal,
    pub total_price: Decimal,
}
