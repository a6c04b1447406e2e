//! reseller_ledger library
//!
//! Balance and credit-allocation ledger behind the reseller admin panel.
//! Re-exports modules for the server binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod audit;
pub mod domain;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod profile;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, DomainError, OperationContext, SignedAmount};
pub use error::{AppError, AppResult};
