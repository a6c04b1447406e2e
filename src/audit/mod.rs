//! Audit Log Service
//!
//! Tamper-evident audit logging with a SHA-256 hash chain. Entries are
//! written inside the transaction of the operation they describe, so an
//! audit row exists if and only if the ledger change committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::OperationContext;

/// Advisory lock key serializing appends to the chain
const AUDIT_CHAIN_LOCK: i64 = 0x6175_6469_745f_6c67;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit log entry for database storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub api_key_id: Option<Uuid>,
    pub request_user_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub changed_fields: Option<Vec<String>>,
    pub client_ip: Option<IpAddr>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ProfileCreated,
    ProfileUpdated,
    ProfileDeactivated,
    BalanceToppedUp,
    BalanceDebited,
    BalanceRefunded,
    BalanceAdjusted,
    BalanceLockChanged,
    CreditAllocated,
    CreditRepaid,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ProfileCreated => "profile.created",
            AuditAction::ProfileUpdated => "profile.updated",
            AuditAction::ProfileDeactivated => "profile.deactivated",
            AuditAction::BalanceToppedUp => "balance.top_up",
            AuditAction::BalanceDebited => "balance.debited",
            AuditAction::BalanceRefunded => "balance.refunded",
            AuditAction::BalanceAdjusted => "balance.adjusted",
            AuditAction::BalanceLockChanged => "balance.lock_changed",
            AuditAction::CreditAllocated => "credit.allocated",
            AuditAction::CreditRepaid => "credit.repaid",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
    changed_fields: Option<Vec<String>>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
            changed_fields: None,
        }
    }

    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn resource_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    pub fn changed_fields(mut self, fields: Vec<String>) -> Self {
        self.changed_fields = Some(fields);
        self
    }
}

/// Hash input for one chain link
fn chain_hash(
    id: Uuid,
    sequence_number: i64,
    action: &str,
    request_user_id: Option<Uuid>,
    before_state: Option<&serde_json::Value>,
    after_state: Option<&serde_json::Value>,
    previous_hash: &str,
) -> String {
    let hash_input = format!(
        "{}{}{}{}{}{}{}",
        id,
        sequence_number,
        action,
        request_user_id.map(|u| u.to_string()).unwrap_or_default(),
        before_state.map(|v| v.to_string()).unwrap_or_default(),
        after_state.map(|v| v.to_string()).unwrap_or_default(),
        previous_hash
    );
    sha256_hex(&hash_input)
}

type AuditRow = (
    Uuid,
    i64,
    Option<Uuid>,
    Option<Uuid>,
    Option<Uuid>,
    String,
    Option<String>,
    Option<Uuid>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    Option<Vec<String>>,
    Option<String>,
    String,
    String,
    DateTime<Utc>,
);

fn entry_from_row(row: AuditRow) -> AuditLogEntry {
    let (
        id,
        sequence_number,
        api_key_id,
        request_user_id,
        correlation_id,
        action,
        resource_type,
        resource_id,
        before_state,
        after_state,
        changed_fields,
        client_ip,
        previous_hash,
        current_hash,
        created_at,
    ) = row;

    AuditLogEntry {
        id,
        sequence_number,
        api_key_id,
        request_user_id,
        correlation_id,
        action,
        resource_type,
        resource_id,
        before_state,
        after_state,
        changed_fields,
        client_ip: client_ip.and_then(|s| s.parse().ok()),
        previous_hash,
        current_hash,
        created_at,
    }
}

/// Audit Log Service
#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an entry to the chain inside `tx`.
    ///
    /// Appends are serialized with a transaction-scoped advisory lock, so
    /// the chain head read here stays the head until `tx` ends.
    pub async fn log_in(
        tx: &mut Transaction<'_, Postgres>,
        builder: AuditLogBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut **tx)
            .await?;

        let head: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_number, current_hash FROM audit_logs ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&mut **tx)
        .await?;

        let (sequence_number, previous_hash) = match head {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let id = Uuid::new_v4();
        let current_hash = chain_hash(
            id,
            sequence_number,
            &builder.action,
            context.request_user_id,
            builder.before_state.as_ref(),
            builder.after_state.as_ref(),
            &previous_hash,
        );

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, sequence_number, api_key_id, request_user_id, correlation_id,
                action, resource_type, resource_id,
                before_state, after_state, changed_fields, client_ip,
                previous_hash, current_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::inet, $13, $14)
            "#,
        )
        .bind(id)
        .bind(sequence_number)
        .bind(context.api_key_id)
        .bind(context.request_user_id)
        .bind(context.correlation_id)
        .bind(&builder.action)
        .bind(&builder.resource_type)
        .bind(builder.resource_id)
        .bind(&builder.before_state)
        .bind(&builder.after_state)
        .bind(&builder.changed_fields)
        .bind(context.client_ip.map(|ip| ip.to_string()))
        .bind(&previous_hash)
        .bind(&current_hash)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            audit_id = %id,
            sequence_number = sequence_number,
            action = %builder.action,
            "Audit log entry created"
        );

        Ok(id)
    }

    /// Verify the integrity of the audit log hash chain
    pub async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError> {
        let limit = limit.unwrap_or(1000);

        let entries: Vec<(
            Uuid,
            i64,
            String,
            String,
            String,
            Option<Uuid>,
            Option<serde_json::Value>,
            Option<serde_json::Value>,
        )> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, action, previous_hash, current_hash,
                   request_user_id, before_state, after_state
            FROM audit_logs
            ORDER BY sequence_number ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut previous_hash = GENESIS_HASH.to_string();

        for (id, seq, action, prev_hash, current_hash, req_user_id, before_state, after_state) in
            &entries
        {
            if prev_hash != &previous_hash {
                return Ok(ChainVerificationResult::broken(
                    *seq,
                    *id,
                    previous_hash,
                    prev_hash.clone(),
                ));
            }

            let calculated_hash = chain_hash(
                *id,
                *seq,
                action,
                *req_user_id,
                before_state.as_ref(),
                after_state.as_ref(),
                prev_hash,
            );

            if &calculated_hash != current_hash {
                return Ok(ChainVerificationResult::broken(
                    *seq,
                    *id,
                    calculated_hash,
                    current_hash.clone(),
                ));
            }

            previous_hash = current_hash.clone();
        }

        Ok(ChainVerificationResult {
            is_valid: true,
            entries_checked: entries.len() as u64,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        })
    }

    /// Most recent entries, optionally only those made by one acting user
    pub async fn get_recent(
        &self,
        request_user_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, api_key_id, request_user_id, correlation_id,
                   action, resource_type, resource_id,
                   before_state, after_state, changed_fields,
                   client_ip::text, previous_hash, current_hash, created_at
            FROM audit_logs
            WHERE $1::uuid IS NULL OR request_user_id = $1
            ORDER BY sequence_number DESC
            LIMIT $2
            "#,
        )
        .bind(request_user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(entry_from_row).collect())
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn broken(sequence_number: i64, id: Uuid, expected: String, actual: String) -> Self {
        Self {
            is_valid: false,
            entries_checked: sequence_number as u64,
            first_invalid_entry: Some(id),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
        }
    }
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AuditLogError> for crate::error::AppError {
    fn from(err: AuditLogError) -> Self {
        match err {
            AuditLogError::Database(e) => crate::error::AppError::Database(e),
        }
    }
}
