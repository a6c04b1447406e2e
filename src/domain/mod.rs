//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;

pub use amount::{Amount, AmountError, AmountInput, SignedAmount};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{AllocationStatus, BalanceEvent, TransactionStatus, TransactionType};
