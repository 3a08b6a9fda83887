use crate::{
    entities::{product, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Stock Reservation Coordinator.
///
/// Converts a captured payment's cart lines into inventory decrements as one
/// atomic unit: either every product's stock drops by exactly its requested
/// quantity, or none do. Each decrement is a conditional update that only
/// succeeds while `stock >= quantity` at write time, so two settlements
/// racing on the same product cannot lose an update or drive stock negative.
/// No locks are held across any gateway round-trip.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    max_retries: u32,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, max_retries: u32) -> Self {
        Self {
            db,
            event_sender,
            max_retries,
        }
    }

    /// Commits the decrements for `lines` (`(product_id, quantity)` pairs).
    ///
    /// A pre-check pass collects *all* shortfalls so the caller can report
    /// every short item, not just the first. A conditional update that loses
    /// a race rolls the whole commit back and retries up to the bounded
    /// budget before surfacing `OutOfStock`.
    #[instrument(skip(self, lines), fields(payment_id = %payment_id, line_count = lines.len()))]
    pub async fn commit(
        &self,
        payment_id: Uuid,
        lines: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let mut attempt = 0;
        loop {
            match self.try_commit(lines).await? {
                CommitOutcome::Applied => {
                    self.event_sender
                        .send_or_log(Event::StockCommitted {
                            payment_id,
                            lines: lines.to_vec(),
                        })
                        .await;
                    info!("stock committed");
                    return Ok(());
                }
                CommitOutcome::Short(names) => {
                    return Err(ServiceError::OutOfStock(names));
                }
                CommitOutcome::Conflict(product_id) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        let name = self.product_name(product_id).await?;
                        warn!(%product_id, "conditional update retries exhausted");
                        return Err(ServiceError::OutOfStock(vec![name]));
                    }
                    warn!(%product_id, attempt, "conditional update conflict; retrying");
                }
            }
        }
    }

    /// Compensating increment used when a later settlement step fails after
    /// the decrements were applied.
    #[instrument(skip(self, lines), fields(payment_id = %payment_id))]
    pub async fn restore(
        &self,
        payment_id: Uuid,
        lines: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        for (product_id, quantity) in lines {
            Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).add(*quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(*product_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::StockRestored {
                payment_id,
                lines: lines.to_vec(),
            })
            .await;

        info!("stock restored");
        Ok(())
    }

    async fn try_commit(&self, lines: &[(Uuid, i32)]) -> Result<CommitOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        // Pass 1: re-read current stock and collect every shortfall.
        let mut short = Vec::new();
        for (product_id, quantity) in lines {
            let product = Product::find_by_id(*product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", product_id))
                })?;
            if product.stock < *quantity {
                short.push(product.name);
            }
        }
        if !short.is_empty() {
            return Ok(CommitOutcome::Short(short));
        }

        // Pass 2: conditional decrements. Zero rows affected means another
        // writer consumed the stock between the read and this write.
        for (product_id, quantity) in lines {
            let result = Product::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(*quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(*product_id))
                .filter(product::Column::Stock.gte(*quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                // Dropping the transaction rolls back earlier decrements.
                return Ok(CommitOutcome::Conflict(*product_id));
            }
        }

        txn.commit().await?;
        Ok(CommitOutcome::Applied)
    }

    async fn product_name(&self, product_id: Uuid) -> Result<String, ServiceError> {
        Ok(Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| product_id.to_string()))
    }
}

enum CommitOutcome {
    Applied,
    Short(Vec<String>),
    Conflict(Uuid),
}
