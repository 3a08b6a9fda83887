use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the checkout and settlement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        product_id: Uuid,
    },

    // Payment events
    PaymentIntentCreated {
        payment_id: Uuid,
        gateway_order_id: String,
        amount_minor: i64,
    },
    PaymentCaptured {
        payment_id: Uuid,
        gateway_order_id: String,
    },
    PaymentVerificationFailed {
        gateway_order_id: String,
    },

    // Stock events
    StockCommitted {
        payment_id: Uuid,
        lines: Vec<(Uuid, i32)>,
    },
    StockRestored {
        payment_id: Uuid,
        lines: Vec<(Uuid, i32)>,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        payment_id: Uuid,
        total_price: Decimal,
    },

    // Settlement failure exits; these are the states reconciliation
    // tooling watches for.
    SettlementFailed {
        gateway_order_id: String,
        reason: String,
    },
}

/// Sender half of the pipeline event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, failing if the channel is closed or full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing. Side-effect events must
    /// never abort a committed settlement step.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Consumes pipeline events and logs them. External delivery (webhooks,
/// queues) would hang off this loop.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::SettlementFailed {
                gateway_order_id,
                reason,
            } => {
                warn!(
                    gateway_order_id = %gateway_order_id,
                    reason = %reason,
                    "settlement failed"
                );
            }
            other => {
                info!(event = ?other, "pipeline event");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}
