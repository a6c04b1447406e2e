//! Ledger Repository
//!
//! Persistence for balances, ledger rows and credit allocations. Writes
//! happen inside a caller-owned transaction with the affected balance rows
//! locked `FOR UPDATE` in ascending user-id order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Aggregate, OutstandingAllocation, RepaymentSlice, UserBalance};
use crate::domain::AllocationStatus;
use crate::error::AppError;

use super::{
    AllocationDirection, CreditAllocationRecord, LedgerBook, LedgerEntry, TransactionFilter,
};

type BalanceRow = (
    Uuid,
    Decimal,
    Decimal,
    Decimal,
    bool,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn balance_from_row(row: BalanceRow) -> UserBalance {
    let (user_id, current, credit_limit, locked, is_locked, version, created_at, updated_at) = row;
    UserBalance::from_db_state(
        user_id,
        current,
        credit_limit,
        locked,
        is_locked,
        version,
        created_at,
        updated_at,
    )
}

#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        Ok(self.pool.begin().await?)
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Balance of an existing profile, created empty on first access
    pub async fn get_or_create_balance(&self, user_id: Uuid) -> Result<UserBalance, AppError> {
        let mut tx = self.begin().await?;
        Self::ensure_balance_row(&mut tx, user_id).await?;

        let row: BalanceRow = sqlx::query_as(
            r#"
            SELECT user_id, current_balance, credit_limit, locked_amount,
                   is_locked, version, created_at, updated_at
            FROM user_balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(balance_from_row(row))
    }

    async fn ensure_balance_row(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let profile_exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?;
        if profile_exists.is_none() {
            return Err(AppError::UserNotFound(user_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO user_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Lock the balance rows of `user_ids` and load them into a book.
    ///
    /// Rows are locked in ascending id order so concurrent operations on the
    /// same pair of users cannot deadlock.
    pub async fn lock_balances(
        tx: &mut Transaction<'_, Postgres>,
        user_ids: &[Uuid],
    ) -> Result<LedgerBook, AppError> {
        let mut ids = user_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut balances = Vec::with_capacity(ids.len());
        for user_id in ids {
            Self::ensure_balance_row(tx, user_id).await?;

            let row: BalanceRow = sqlx::query_as(
                r#"
                SELECT user_id, current_balance, credit_limit, locked_amount,
                       is_locked, version, created_at, updated_at
                FROM user_balances
                WHERE user_id = $1
                FOR UPDATE
                "#,
            )
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;

            balances.push(balance_from_row(row));
        }

        Ok(LedgerBook::new(balances))
    }

    /// Write back every changed balance and append the ledger rows
    pub async fn persist(
        tx: &mut Transaction<'_, Postgres>,
        book: &LedgerBook,
    ) -> Result<(), AppError> {
        for (balance, loaded_version) in book.changed() {
            let rows = sqlx::query(
                r#"
                UPDATE user_balances
                SET current_balance = $2,
                    credit_limit = $3,
                    locked_amount = $4,
                    is_locked = $5,
                    version = $6,
                    updated_at = NOW()
                WHERE user_id = $1 AND version = $7
                "#,
            )
            .bind(balance.user_id())
            .bind(balance.current_balance())
            .bind(balance.credit_limit())
            .bind(balance.locked_amount())
            .bind(balance.is_locked())
            .bind(balance.version())
            .bind(loaded_version)
            .execute(&mut **tx)
            .await?
            .rows_affected();

            if rows != 1 {
                tracing::warn!(
                    user_id = %balance.user_id(),
                    expected_version = loaded_version,
                    "Balance version moved under a row lock"
                );
                return Err(AppError::VersionConflict);
            }
        }

        for entry in book.entries() {
            Self::insert_entry(tx, entry).await?;
        }

        Ok(())
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, user_id, transaction_type, amount, balance_before, balance_after,
                related_user_id, status, description, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.transaction_type)
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.related_user_id)
        .bind(entry.status)
        .bind(&entry.description)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Credit allocations
    // =========================================================================

    /// Must run after [`persist`](Self::persist): the row references the
    /// allocator-side ledger entry.
    pub async fn insert_allocation(
        tx: &mut Transaction<'_, Postgres>,
        allocation: &CreditAllocationRecord,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO credit_allocations (
                id, transaction_id, from_user_id, to_user_id,
                amount, outstanding, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(allocation.id)
        .bind(allocation.transaction_id)
        .bind(allocation.from_user_id)
        .bind(allocation.to_user_id)
        .bind(allocation.amount)
        .bind(allocation.outstanding)
        .bind(allocation.status)
        .bind(allocation.created_at)
        .bind(allocation.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Active allocations received by `user_id`, oldest first, locked
    pub async fn outstanding_allocations(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<OutstandingAllocation>, AppError> {
        let rows: Vec<(Uuid, Uuid, Decimal, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, from_user_id, outstanding, created_at
            FROM credit_allocations
            WHERE to_user_id = $1 AND status = 'active' AND outstanding > 0
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(allocation_id, from_user_id, outstanding, created_at)| OutstandingAllocation {
                allocation_id,
                from_user_id,
                outstanding,
                created_at,
            })
            .collect())
    }

    pub async fn apply_repayment(
        tx: &mut Transaction<'_, Postgres>,
        slice: &RepaymentSlice,
    ) -> Result<(), AppError> {
        let status = if slice.remaining.is_zero() {
            AllocationStatus::Repaid
        } else {
            AllocationStatus::Active
        };

        sqlx::query(
            r#"
            UPDATE credit_allocations
            SET outstanding = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(slice.allocation_id)
        .bind(slice.remaining)
        .bind(status)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ledger rows of a user, newest first
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, transaction_type, amount, balance_before, balance_after,
                   related_user_id, status, description, metadata, created_at
            FROM transactions
            WHERE user_id = $1 AND ($2::text IS NULL OR transaction_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(filter.transaction_type.map(|t| t.as_str()))
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn list_allocations(
        &self,
        user_id: Uuid,
        direction: AllocationDirection,
    ) -> Result<Vec<CreditAllocationRecord>, AppError> {
        let column = match direction {
            AllocationDirection::Granted => "from_user_id",
            AllocationDirection::Received => "to_user_id",
        };

        let allocations = sqlx::query_as::<_, CreditAllocationRecord>(&format!(
            r#"
            SELECT id, transaction_id, from_user_id, to_user_id,
                   amount, outstanding, status, created_at, updated_at
            FROM credit_allocations
            WHERE {} = $1
            ORDER BY created_at DESC
            "#,
            column
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(allocations)
    }
}
