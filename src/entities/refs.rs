use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

use super::payment;
use crate::errors::ServiceError;

/// Reference to a payment that is either still an id or a loaded record.
///
/// Replaces the "sometimes an id, sometimes the entity" field shape: callers
/// must go through [`PaymentRef::resolve`] before reading payment fields.
#[derive(Debug, Clone)]
pub enum PaymentRef {
    Unresolved(Uuid),
    Resolved(payment::Model),
}

impl PaymentRef {
    /// The payment id, regardless of resolution state.
    pub fn id(&self) -> Uuid {
        match self {
            PaymentRef::Unresolved(id) => *id,
            PaymentRef::Resolved(model) => model.id,
        }
    }

    /// Loads the payment record if not already resolved.
    pub async fn resolve(
        self,
        conn: &impl ConnectionTrait,
    ) -> Result<payment::Model, ServiceError> {
        match self {
            PaymentRef::Resolved(model) => Ok(model),
            PaymentRef::Unresolved(id) => payment::Entity::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id))),
        }
    }
}

impl From<payment::Model> for PaymentRef {
    fn from(model: payment::Model) -> Self {
        PaymentRef::Resolved(model)
    }
}

impl From<Uuid> for PaymentRef {
    fn from(id: Uuid) -> Self {
        PaymentRef::Unresolved(id)
    }
}
