//! Command Handlers module
//!
//! Handlers validate a command, lock the balances involved, apply the
//! aggregate rules and persist everything in one database transaction.

pub mod access;
mod allocation_handler;
mod balance_handler;
mod commands;
mod lock_handler;
mod profile_handler;
mod spend_handler;
mod top_up_handler;


pub use allocation_handler::AllocateCreditHandler;
pub use balance_handler::BalanceQueryHandler;
pub use commands::*;
pub use lock_handler::LockBalanceHandler;
pub use profile_handler::ProfileHandler;
pub use spend_handler::SpendHandler;
pub use top_up_handler::TopUpHandler;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::idempotency::{IdempotencyClaim, IdempotencyRepository};

const MAX_ATTEMPTS: u32 = 3;

/// Run `attempt` again when it fails with a serialization failure or
/// deadlock, backing off 50ms per attempt.
pub(crate) async fn with_retry<T, F, Fut>(operation: &'static str, mut attempt: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_retryable() && tries < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(50 * tries as u64);
                tracing::warn!(
                    operation = operation,
                    error = %e,
                    "Concurrency conflict, retrying (attempt {}/{})",
                    tries,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Claim the idempotency key in `tx`, or return the response stored by an
/// earlier identical request from the same API key.
pub(crate) async fn claim_idempotency<T, C>(
    idempotency: &IdempotencyRepository,
    tx: &mut Transaction<'_, Postgres>,
    key: Option<Uuid>,
    operation: &str,
    command: &C,
    context: &OperationContext,
) -> Result<Option<T>, AppError>
where
    T: DeserializeOwned,
    C: Serialize,
{
    let Some(key) = key else {
        return Ok(None);
    };

    let body = serde_json::to_vec(command).map_err(|e| AppError::Internal(e.to_string()))?;
    let request_hash =
        IdempotencyRepository::compute_request_hash(context.api_key_id, operation, &body);

    match idempotency.claim(tx, key, &request_hash).await? {
        IdempotencyClaim::Claimed => Ok(None),
        IdempotencyClaim::Replay { body, .. } => {
            tracing::info!(idempotency_key = %key, operation = operation, "Replaying stored response");
            serde_json::from_value(body)
                .map(Some)
                .map_err(|e| AppError::Internal(format!("Stored response unreadable: {}", e)))
        }
    }
}

/// Store the response for a claimed key
pub(crate) async fn complete_idempotency<T: Serialize>(
    idempotency: &IdempotencyRepository,
    tx: &mut Transaction<'_, Postgres>,
    key: Option<Uuid>,
    result: &T,
) -> Result<(), AppError> {
    let Some(key) = key else {
        return Ok(());
    };

    let body = serde_json::to_value(result).map_err(|e| AppError::Internal(e.to_string()))?;
    idempotency.complete(tx, key, 200, &body).await?;
    Ok(())
}
