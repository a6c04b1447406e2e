//! Idempotency Repository
//!
//! Keys are claimed inside the same database transaction as the ledger
//! mutation they guard. A rolled-back operation releases its key; a
//! committed one stores the response for replay until the key expires.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Default time a stored response stays replayable
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Outcome of claiming a key
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyClaim {
    /// First use; the caller performs the operation and completes the key
    Claimed,
    /// Already completed with the same request; replay the stored response
    Replay {
        status: i32,
        body: serde_json::Value,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key {0} is held by a request without a stored response")]
    KeyInProgress(Uuid),

    #[error("Request hash mismatch for key {0}")]
    HashMismatch(Uuid),

    #[error("Key not found: {0}")]
    NotFound(Uuid),
}

impl From<IdempotencyError> for crate::error::AppError {
    fn from(err: IdempotencyError) -> Self {
        use crate::error::AppError;
        match err {
            IdempotencyError::Database(e) => AppError::Database(e),
            IdempotencyError::HashMismatch(_) | IdempotencyError::KeyInProgress(_) => {
                AppError::IdempotencyConflict
            }
            IdempotencyError::NotFound(key) => {
                AppError::Internal(format!("Idempotency key {} vanished", key))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
    ttl_hours: i64,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    pub fn with_ttl_hours(mut self, ttl_hours: i64) -> Self {
        self.ttl_hours = ttl_hours.max(1);
        self
    }

    /// Claim `key` for this transaction.
    ///
    /// A concurrent request holding the same key blocks here until its
    /// transaction finishes, then observes the stored response.
    pub async fn claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
        request_hash: &str,
    ) -> Result<IdempotencyClaim, IdempotencyError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3::bigint * INTERVAL '1 hour'))
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(self.ttl_hours)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(IdempotencyClaim::Claimed);
        }

        // Expired keys are reusable
        let reclaimed = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET request_hash = $2,
                response_status = NULL,
                response_body = NULL,
                created_at = NOW(),
                expires_at = NOW() + ($3::bigint * INTERVAL '1 hour')
            WHERE key = $1 AND expires_at <= NOW()
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(self.ttl_hours)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if reclaimed == 1 {
            return Ok(IdempotencyClaim::Claimed);
        }

        let existing: Option<(String, Option<i32>, Option<serde_json::Value>)> = sqlx::query_as(
            r#"
            SELECT request_hash, response_status, response_body
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        let (stored_hash, status, body) = existing.ok_or(IdempotencyError::NotFound(key))?;
        if stored_hash != request_hash {
            return Err(IdempotencyError::HashMismatch(key));
        }

        match (status, body) {
            (Some(status), Some(body)) => Ok(IdempotencyClaim::Replay { status, body }),
            _ => Err(IdempotencyError::KeyInProgress(key)),
        }
    }

    /// Store the response for a claimed key
    pub async fn complete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
        response_status: i32,
        response_body: &serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET response_status = $2, response_body = $3
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(response_status)
        .bind(response_body)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key));
        }

        Ok(())
    }

    /// Delete expired idempotency keys
    pub async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows)
    }

    /// SHA-256 of the calling API key, the operation name and its canonical
    /// request body. A key reused by another client never matches.
    pub fn compute_request_hash(api_key_id: Option<Uuid>, operation: &str, body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        if let Some(api_key_id) = api_key_id {
            hasher.update(api_key_id.as_bytes());
        }
        hasher.update(b":");
        hasher.update(operation.as_bytes());
        hasher.update(b":");
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_compute_request_hash() {
        let body = br#"{"amount":"100.00"}"#;
        let hash = IdempotencyRepository::compute_request_hash(None, "top_up", body);

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, IdempotencyRepository::compute_request_hash(None, "top_up", body));
        assert_ne!(
            hash,
            IdempotencyRepository::compute_request_hash(None, "top_up", br#"{"amount":"200.00"}"#)
        );
    }

    #[test]
    fn test_same_body_different_operation_differs() {
        let body = br#"{"amount":"5"}"#;
        assert_ne!(
            IdempotencyRepository::compute_request_hash(None, "top_up", body),
            IdempotencyRepository::compute_request_hash(None, "debit", body)
        );
    }

    #[test]
    fn test_same_body_different_api_key_differs() {
        let body = br#"{"user_id":"u","amount":"100"}"#;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(
            IdempotencyRepository::compute_request_hash(Some(first), "top_up", body),
            IdempotencyRepository::compute_request_hash(Some(first), "top_up", body)
        );
        assert_ne!(
            IdempotencyRepository::compute_request_hash(Some(first), "top_up", body),
            IdempotencyRepository::compute_request_hash(Some(second), "top_up", body)
        );
        assert_ne!(
            IdempotencyRepository::compute_request_hash(Some(first), "top_up", body),
            IdempotencyRepository::compute_request_hash(None, "top_up", body)
        );
    }

    #[test]
    fn test_errors_map_to_conflict() {
        let err: AppError = IdempotencyError::HashMismatch(Uuid::nil()).into();
        assert!(matches!(err, AppError::IdempotencyConflict));

        let err: AppError = IdempotencyError::KeyInProgress(Uuid::nil()).into();
        assert!(matches!(err, AppError::IdempotencyConflict));
    }

    #[test]
    fn test_idempotency_error_display() {
        let err = IdempotencyError::HashMismatch(Uuid::nil());
        assert!(err.to_string().contains("hash mismatch"));

        let err = IdempotencyError::NotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));
    }
}
