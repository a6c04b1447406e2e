//! Ledger Events
//!
//! Facts produced by the balance aggregate. Each money-moving event becomes
//! one immutable row in the `transactions` table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger entry type stored as TEXT in database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    TopUp,
    CreditAllocation,
    Debit,
    Refund,
    AutoRepayment,
    BalanceAdjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "top_up",
            TransactionType::CreditAllocation => "credit_allocation",
            TransactionType::Debit => "debit",
            TransactionType::Refund => "refund",
            TransactionType::AutoRepayment => "auto_repayment",
            TransactionType::BalanceAdjustment => "balance_adjustment",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_up" => Ok(TransactionType::TopUp),
            "credit_allocation" => Ok(TransactionType::CreditAllocation),
            "debit" => Ok(TransactionType::Debit),
            "refund" => Ok(TransactionType::Refund),
            "auto_repayment" => Ok(TransactionType::AutoRepayment),
            "balance_adjustment" => Ok(TransactionType::BalanceAdjustment),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Ledger entry status stored as TEXT in database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Credit allocation lifecycle stored as TEXT in database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Active,
    Repaid,
}

/// Balance-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BalanceEvent {
    /// External money entered the balance
    ToppedUp {
        user_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        description: Option<String>,
        occurred_at: DateTime<Utc>,
    },

    /// Spending charged against the balance (may use credit)
    Debited {
        user_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        description: Option<String>,
        occurred_at: DateTime<Utc>,
    },

    /// A previous charge was returned
    Refunded {
        user_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        description: Option<String>,
        occurred_at: DateTime<Utc>,
    },

    /// Administrative correction; `delta` is signed
    Adjusted {
        user_id: Uuid,
        delta: Decimal,
        transaction_id: Uuid,
        reason: String,
        occurred_at: DateTime<Utc>,
    },

    /// Creator locked part of its available balance for a user
    CreditGranted {
        user_id: Uuid,
        to_user_id: Uuid,
        allocation_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// User's credit limit was raised by its creator
    CreditReceived {
        user_id: Uuid,
        from_user_id: Uuid,
        allocation_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// Part of a top-up settled debt owed to the creator
    RepaymentMade {
        user_id: Uuid,
        to_user_id: Uuid,
        allocation_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// Creator's locked funds were released by a repayment
    RepaymentReceived {
        user_id: Uuid,
        from_user_id: Uuid,
        allocation_id: Uuid,
        amount: Decimal,
        transaction_id: Uuid,
        occurred_at: DateTime<Utc>,
    },

    /// Mutation gate changed
    LockChanged {
        user_id: Uuid,
        locked: bool,
        occurred_at: DateTime<Utc>,
    },
}

impl BalanceEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            BalanceEvent::ToppedUp { .. } => "ToppedUp",
            BalanceEvent::Debited { .. } => "Debited",
            BalanceEvent::Refunded { .. } => "Refunded",
            BalanceEvent::Adjusted { .. } => "Adjusted",
            BalanceEvent::CreditGranted { .. } => "CreditGranted",
            BalanceEvent::CreditReceived { .. } => "CreditReceived",
            BalanceEvent::RepaymentMade { .. } => "RepaymentMade",
            BalanceEvent::RepaymentReceived { .. } => "RepaymentReceived",
            BalanceEvent::LockChanged { .. } => "LockChanged",
        }
    }

    /// Get the user whose balance this event changes
    pub fn user_id(&self) -> Uuid {
        match self {
            BalanceEvent::ToppedUp { user_id, .. }
            | BalanceEvent::Debited { user_id, .. }
            | BalanceEvent::Refunded { user_id, .. }
            | BalanceEvent::Adjusted { user_id, .. }
            | BalanceEvent::CreditGranted { user_id, .. }
            | BalanceEvent::CreditReceived { user_id, .. }
            | BalanceEvent::RepaymentMade { user_id, .. }
            | BalanceEvent::RepaymentReceived { user_id, .. }
            | BalanceEvent::LockChanged { user_id, .. } => *user_id,
        }
    }

    /// Ledger entry type, or `None` for events that move no money
    pub fn transaction_type(&self) -> Option<TransactionType> {
        match self {
            BalanceEvent::ToppedUp { .. } => Some(TransactionType::TopUp),
            BalanceEvent::Debited { .. } => Some(TransactionType::Debit),
            BalanceEvent::Refunded { .. } => Some(TransactionType::Refund),
            BalanceEvent::Adjusted { .. } => Some(TransactionType::BalanceAdjustment),
            BalanceEvent::CreditGranted { .. } | BalanceEvent::CreditReceived { .. } => {
                Some(TransactionType::CreditAllocation)
            }
            BalanceEvent::RepaymentMade { .. } | BalanceEvent::RepaymentReceived { .. } => {
                Some(TransactionType::AutoRepayment)
            }
            BalanceEvent::LockChanged { .. } => None,
        }
    }

    /// Ledger row id carried by the event
    pub fn transaction_id(&self) -> Option<Uuid> {
        match self {
            BalanceEvent::ToppedUp { transaction_id, .. }
            | BalanceEvent::Debited { transaction_id, .. }
            | BalanceEvent::Refunded { transaction_id, .. }
            | BalanceEvent::Adjusted { transaction_id, .. }
            | BalanceEvent::CreditGranted { transaction_id, .. }
            | BalanceEvent::CreditReceived { transaction_id, .. }
            | BalanceEvent::RepaymentMade { transaction_id, .. }
            | BalanceEvent::RepaymentReceived { transaction_id, .. } => Some(*transaction_id),
            BalanceEvent::LockChanged { .. } => None,
        }
    }

    /// Positive magnitude recorded on the ledger row
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            BalanceEvent::ToppedUp { amount, .. }
            | BalanceEvent::Debited { amount, .. }
            | BalanceEvent::Refunded { amount, .. }
            | BalanceEvent::CreditGranted { amount, .. }
            | BalanceEvent::CreditReceived { amount, .. }
            | BalanceEvent::RepaymentMade { amount, .. }
            | BalanceEvent::RepaymentReceived { amount, .. } => Some(*amount),
            BalanceEvent::Adjusted { delta, .. } => Some(delta.abs()),
            BalanceEvent::LockChanged { .. } => None,
        }
    }

    /// Counterparty of the entry, if any
    pub fn related_user_id(&self) -> Option<Uuid> {
        match self {
            BalanceEvent::CreditGranted { to_user_id, .. }
            | BalanceEvent::RepaymentMade { to_user_id, .. } => Some(*to_user_id),
            BalanceEvent::CreditReceived { from_user_id, .. }
            | BalanceEvent::RepaymentReceived { from_user_id, .. } => Some(*from_user_id),
            _ => None,
        }
    }

    /// Allocation the entry belongs to, if any
    pub fn allocation_id(&self) -> Option<Uuid> {
        match self {
            BalanceEvent::CreditGranted { allocation_id, .. }
            | BalanceEvent::CreditReceived { allocation_id, .. }
            | BalanceEvent::RepaymentMade { allocation_id, .. }
            | BalanceEvent::RepaymentReceived { allocation_id, .. } => Some(*allocation_id),
            _ => None,
        }
    }

    /// Free-text description stored on the ledger row
    pub fn description(&self) -> Option<String> {
        match self {
            BalanceEvent::ToppedUp { description, .. }
            | BalanceEvent::Debited { description, .. }
            | BalanceEvent::Refunded { description, .. } => description.clone(),
            BalanceEvent::Adjusted { reason, .. } => Some(reason.clone()),
            BalanceEvent::CreditGranted { to_user_id, .. } => {
                Some(format!("Credit allocated to {}", to_user_id))
            }
            BalanceEvent::CreditReceived { from_user_id, .. } => {
                Some(format!("Credit received from {}", from_user_id))
            }
            BalanceEvent::RepaymentMade { to_user_id, .. } => {
                Some(format!("Automatic repayment to {}", to_user_id))
            }
            BalanceEvent::RepaymentReceived { from_user_id, .. } => {
                Some(format!("Automatic repayment from {}", from_user_id))
            }
            BalanceEvent::LockChanged { .. } => None,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BalanceEvent::ToppedUp { occurred_at, .. }
            | BalanceEvent::Debited { occurred_at, .. }
            | BalanceEvent::Refunded { occurred_at, .. }
            | BalanceEvent::Adjusted { occurred_at, .. }
            | BalanceEvent::CreditGranted { occurred_at, .. }
            | BalanceEvent::CreditReceived { occurred_at, .. }
            | BalanceEvent::RepaymentMade { occurred_at, .. }
            | BalanceEvent::RepaymentReceived { occurred_at, .. }
            | BalanceEvent::LockChanged { occurred_at, .. } => *occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_type_round_trips_through_str() {
        for ty in [
            TransactionType::TopUp,
            TransactionType::CreditAllocation,
            TransactionType::Debit,
            TransactionType::Refund,
            TransactionType::AutoRepayment,
            TransactionType::BalanceAdjustment,
        ] {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!("transfer".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_lock_event_has_no_ledger_row() {
        let event = BalanceEvent::LockChanged {
            user_id: Uuid::new_v4(),
            locked: true,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.transaction_type(), None);
        assert_eq!(event.transaction_id(), None);
        assert_eq!(event.amount(), None);
    }

    #[test]
    fn test_adjustment_records_magnitude() {
        let event = BalanceEvent::Adjusted {
            user_id: Uuid::new_v4(),
            delta: dec!(-40),
            transaction_id: Uuid::new_v4(),
            reason: "chargeback".to_string(),
            occurred_at: Utc::now(),
        };
        assert_eq!(event.amount(), Some(dec!(40)));
        assert_eq!(event.transaction_type(), Some(TransactionType::BalanceAdjustment));
        assert_eq!(event.description().as_deref(), Some("chargeback"));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let from = Uuid::new_v4();
        let event = BalanceEvent::CreditReceived {
            user_id: Uuid::new_v4(),
            from_user_id: from,
            allocation_id: Uuid::new_v4(),
            amount: dec!(10),
            transaction_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CreditReceived");
        assert_eq!(event.related_user_id(), Some(from));
    }
}
