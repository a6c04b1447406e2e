//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance: expiring idempotency keys and
//! rate-limit buckets, and checking that stored balance figures still agree
//! with the allocation records behind them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;
use uuid::Uuid;

use crate::audit::AuditLogService;

/// Clean up expired rate limit buckets
/// Removes buckets older than 2 minutes to prevent unbounded growth
pub async fn cleanup_rate_limit_buckets(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM rate_limit_buckets
        WHERE window_start < NOW() - INTERVAL '2 minutes'
        "#,
    )
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Cleaned up expired rate limit buckets"
        );
    }

    Ok(rows_deleted)
}

/// Delete idempotency keys past their expiry
pub async fn delete_expired_idempotency_keys(pool: &PgPool) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM idempotency_keys
        WHERE expires_at < NOW()
        "#,
    )
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(
            rows_deleted = rows_deleted,
            "Deleted expired idempotency keys"
        );
    }

    Ok(rows_deleted)
}

/// A balance whose stored figures disagree with its allocations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerDrift {
    pub user_id: Uuid,
    pub locked_amount: Decimal,
    pub granted_outstanding: Decimal,
    pub credit_limit: Decimal,
    pub received_outstanding: Decimal,
}

impl LedgerDrift {
    pub fn locked_drift(&self) -> Decimal {
        self.locked_amount - self.granted_outstanding
    }

    pub fn credit_drift(&self) -> Decimal {
        self.credit_limit - self.received_outstanding
    }
}

/// Compare `locked_amount` and `credit_limit` with the outstanding totals
/// of active allocations. Drift is logged, never corrected.
pub async fn reconcile_ledger(pool: &PgPool) -> Result<Vec<LedgerDrift>, JobError> {
    let rows: Vec<(Uuid, Decimal, Decimal, Decimal, Decimal)> = sqlx::query_as(
        r#"
        SELECT b.user_id,
               b.locked_amount,
               COALESCE(g.total, 0) AS granted_outstanding,
               b.credit_limit,
               COALESCE(r.total, 0) AS received_outstanding
        FROM user_balances b
        LEFT JOIN (
            SELECT from_user_id, SUM(outstanding) AS total
            FROM credit_allocations
            WHERE status = 'active'
            GROUP BY from_user_id
        ) g ON g.from_user_id = b.user_id
        LEFT JOIN (
            SELECT to_user_id, SUM(outstanding) AS total
            FROM credit_allocations
            WHERE status = 'active'
            GROUP BY to_user_id
        ) r ON r.to_user_id = b.user_id
        WHERE b.locked_amount <> COALESCE(g.total, 0)
           OR b.credit_limit <> COALESCE(r.total, 0)
        "#,
    )
    .fetch_all(pool)
    .await?;

    let drift: Vec<LedgerDrift> = rows
        .into_iter()
        .map(
            |(user_id, locked_amount, granted_outstanding, credit_limit, received_outstanding)| {
                LedgerDrift {
                    user_id,
                    locked_amount,
                    granted_outstanding,
                    credit_limit,
                    received_outstanding,
                }
            },
        )
        .collect();

    for d in &drift {
        tracing::error!(
            user_id = %d.user_id,
            locked_drift = %d.locked_drift(),
            credit_drift = %d.credit_drift(),
            "Ledger drift detected"
        );
    }

    Ok(drift)
}

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for rate limit cleanup (default: 1 minute)
    pub rate_limit_cleanup_interval: Duration,
    /// Interval for idempotency key expiry (default: 10 minutes)
    pub idempotency_cleanup_interval: Duration,
    /// Interval for ledger reconciliation and audit chain check (default: 1 hour)
    pub reconciliation_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            rate_limit_cleanup_interval: Duration::from_secs(60),
            idempotency_cleanup_interval: Duration::from_secs(600),
            reconciliation_interval: Duration::from_secs(3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut rate_limit_interval = interval(self.config.rate_limit_cleanup_interval);
        let mut idempotency_interval = interval(self.config.idempotency_cleanup_interval);
        let mut reconciliation_interval = interval(self.config.reconciliation_interval);

        loop {
            tokio::select! {
                _ = rate_limit_interval.tick() => {
                    if let Err(e) = cleanup_rate_limit_buckets(&self.pool).await {
                        tracing::error!(error = %e, "Rate limit cleanup failed");
                    }
                }
                _ = idempotency_interval.tick() => {
                    if let Err(e) = delete_expired_idempotency_keys(&self.pool).await {
                        tracing::error!(error = %e, "Idempotency key deletion failed");
                    }
                }
                _ = reconciliation_interval.tick() => {
                    if let Err(e) = reconcile_ledger(&self.pool).await {
                        tracing::error!(error = %e, "Ledger reconciliation failed");
                    }
                    if let Err(e) = verify_audit_chain(&self.pool).await {
                        tracing::error!(error = %e, "Audit chain verification failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match cleanup_rate_limit_buckets(&self.pool).await {
            Ok(count) => report.rate_limit_buckets_cleaned = count,
            Err(e) => report.errors.push(format!("Rate limit cleanup: {}", e)),
        }

        match delete_expired_idempotency_keys(&self.pool).await {
            Ok(count) => report.idempotency_keys_deleted = count,
            Err(e) => report.errors.push(format!("Idempotency deletion: {}", e)),
        }

        match reconcile_ledger(&self.pool).await {
            Ok(drift) => report.ledger_drift = drift,
            Err(e) => report.errors.push(format!("Ledger reconciliation: {}", e)),
        }

        match verify_audit_chain(&self.pool).await {
            Ok(valid) => report.audit_chain_valid = Some(valid),
            Err(e) => report.errors.push(format!("Audit chain: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

async fn verify_audit_chain(pool: &PgPool) -> Result<bool, JobError> {
    let result = AuditLogService::new(pool.clone())
        .verify_hash_chain(None)
        .await
        .map_err(|e| JobError::Audit(e.to_string()))?;

    if !result.is_valid {
        tracing::error!(
            first_invalid_entry = ?result.first_invalid_entry,
            expected_hash = ?result.expected_hash,
            actual_hash = ?result.actual_hash,
            "Audit hash chain broken"
        );
    }

    Ok(result.is_valid)
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub rate_limit_buckets_cleaned: u64,
    pub idempotency_keys_deleted: u64,
    pub ledger_drift: Vec<LedgerDrift>,
    pub audit_chain_valid: Option<bool>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl MaintenanceReport {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty() && self.ledger_drift.is_empty() && self.audit_chain_valid != Some(false)
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit error: {0}")]
    Audit(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.rate_limit_cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.idempotency_cleanup_interval, Duration::from_secs(600));
        assert_eq!(config.reconciliation_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_ledger_drift_amounts() {
        let drift = LedgerDrift {
            user_id: Uuid::new_v4(),
            locked_amount: dec!(150),
            granted_outstanding: dec!(100),
            credit_limit: dec!(0),
            received_outstanding: dec!(25),
        };
        assert_eq!(drift.locked_drift(), dec!(50));
        assert_eq!(drift.credit_drift(), dec!(-25));
    }

    #[test]
    fn test_maintenance_report_health() {
        let report = MaintenanceReport::default();
        assert!(report.is_healthy());

        let report = MaintenanceReport {
            audit_chain_valid: Some(false),
            ..MaintenanceReport::default()
        };
        assert!(!report.is_healthy());
    }
}
