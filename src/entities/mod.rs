//! Persistent record shapes for the checkout and settlement pipeline.

pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod refs;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentMethod, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
pub use refs::PaymentRef;
