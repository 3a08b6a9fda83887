use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment record, one per checkout attempt.
///
/// `gateway_order_id` is immutable once assigned and is the idempotency
/// anchor: at most one payment per gateway order id may reach `captured`.
/// `gateway_payment_id` and `signature` are populated only after capture.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub cart_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[sea_orm(unique)]
    pub transaction_id: String,
    #[sea_orm(indexed)]
    pub gateway_order_id: String,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    #[sea_orm(nullable)]
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment status state machine:
/// `created -> authorized|captured -> {refunded, cancelled}`,
/// `created -> failed` and `created -> cancelled` (superseded intent).
/// Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "authorized")]
    Authorized,
    #[sea_orm(string_value = "captured")]
    Captured,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Authorized)
                | (Created, Captured)
                | (Created, Failed)
                | (Created, Cancelled)
                | (Authorized, Captured)
                | (Authorized, Cancelled)
                | (Captured, Refunded)
                | (Captured, Cancelled)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        use PaymentStatus::*;
        matches!(self, Failed | Refunded | Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "netbanking")]
    Netbanking,
    #[sea_orm(string_value = "upi")]
    Upi,
    #[sea_orm(string_value = "wallet")]
    Wallet,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "other")]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_can_capture_fail_or_cancel() {
        assert!(PaymentStatus::Created.can_transition_to(PaymentStatus::Captured));
        assert!(PaymentStatus::Created.can_transition_to(PaymentStatus::Authorized));
        assert!(PaymentStatus::Created.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Created.can_transition_to(PaymentStatus::Cancelled));
        assert!(!PaymentStatus::Created.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn captured_is_not_terminal_but_cannot_regress() {
        assert!(!PaymentStatus::Captured.is_terminal());
        assert!(!PaymentStatus::Captured.can_transition_to(PaymentStatus::Created));
        assert!(!PaymentStatus::Captured.can_transition_to(PaymentStatus::Captured));
        assert!(PaymentStatus::Captured.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn failed_is_terminal() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Captured));
    }
}
