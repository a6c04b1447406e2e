//! Idempotency module
//!
//! Prevents duplicate request processing using idempotency keys.

mod repository;

pub use repository::{
    IdempotencyClaim, IdempotencyError, IdempotencyRepository, DEFAULT_TTL_HOURS,
};
