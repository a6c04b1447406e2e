//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Ledger rule violations.
///
/// These errors represent business rule violations and invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Spending or allocation exceeds what the balance allows
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    /// Balance is locked and rejects mutations
    #[error("Balance is locked for user {user_id}")]
    BalanceLocked { user_id: Uuid },

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Credit can only be allocated by a user's creator
    #[error("User {allocator} is not the creator of {recipient}")]
    NotCreator { allocator: Uuid, recipient: Uuid },

    /// Allocation to oneself
    #[error("Cannot allocate credit to the same user")]
    SelfAllocation,

    /// Business rule violation
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Stored state does not satisfy a ledger invariant
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

    /// Create a balance locked error
    pub fn balance_locked(user_id: Uuid) -> Self {
        Self::BalanceLocked { user_id }
    }
}

impl From<crate::domain::AmountError> for DomainError {
    fn from(err: crate::domain::AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}
