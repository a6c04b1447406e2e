//! Aggregate module
//!
//! Aggregate roots own the ledger rules: commands produce events, events are
//! applied to produce the next state.

pub mod balance;

pub use balance::{
    allocate_credit, plan_repayment, CreditAllocationPlan, OutstandingAllocation, RepaymentSlice,
    UserBalance,
};

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized + Default {
    /// The type of events this aggregate handles
    type Event;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state
    fn apply(self, event: Self::Event) -> Self;
}
