//! Ledger module
//!
//! Balance rows, the append-only transaction log and credit allocations.

mod book;
mod records;
mod repository;

pub use book::LedgerBook;
pub use records::{
    AllocationDirection, BalanceView, CreditAllocationRecord, LedgerEntry, TransactionFilter,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use repository::LedgerRepository;
