//! The settlement pipeline, one service per concern.

pub mod carts;
pub mod orders;
pub mod payments;
pub mod settlement;
pub mod stock;

pub use carts::{CartService, CartSnapshot};
pub use orders::OrderService;
pub use payments::PaymentService;
pub use settlement::SettlementService;
pub use stock::StockService;
