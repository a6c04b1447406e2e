//! Credit Allocation Handler
//!
//! A creator locks part of its available balance and raises the credit
//! limit of a user it created, atomically.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::allocate_credit;
use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{AllocationStatus, Amount, OperationContext};
use crate::error::AppError;
use crate::idempotency::IdempotencyRepository;
use crate::ledger::{BalanceView, CreditAllocationRecord, LedgerRepository};
use crate::profile::ProfileRepository;

use super::access::{acting_user, ensure_can_allocate};
use super::{
    claim_idempotency, complete_idempotency, with_retry, AllocateCreditCommand, AllocationResult,
};

pub struct AllocateCreditHandler {
    ledger: LedgerRepository,
    profiles: ProfileRepository,
    idempotency: IdempotencyRepository,
}

impl AllocateCreditHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: LedgerRepository::new(pool.clone()),
            profiles: ProfileRepository::new(pool.clone()),
            idempotency: IdempotencyRepository::new(pool),
        }
    }

    pub fn with_idempotency_ttl(mut self, hours: i64) -> Self {
        self.idempotency = self.idempotency.with_ttl_hours(hours);
        self
    }

    pub async fn execute(
        &self,
        command: AllocateCreditCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AllocationResult, AppError> {
        let amount: Amount = command.amount.parse()?;

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let from = self.profiles.get_active(command.from_user_id).await?;
        ensure_can_allocate(&actor, &from)?;

        with_retry("allocate_credit", || {
            self.try_execute(&command, amount, idempotency_key, context)
        })
        .await
    }

    async fn try_execute(
        &self,
        command: &AllocateCreditCommand,
        amount: Amount,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AllocationResult, AppError> {
        let mut tx = self.ledger.begin().await?;

        if let Some(replayed) = claim_idempotency(
            &self.idempotency,
            &mut tx,
            idempotency_key,
            "allocate_credit",
            command,
            context,
        )
        .await?
        {
            return Ok(replayed);
        }

        // Read the ownership edge under a share lock so it cannot move
        // while the allocation is in flight
        let recipient = ProfileRepository::get_active_in(&mut tx, command.to_user_id).await?;

        let mut book = LedgerRepository::lock_balances(
            &mut tx,
            &[command.from_user_id, command.to_user_id],
        )
        .await?;

        let plan = allocate_credit(
            book.balance(command.from_user_id)?,
            book.balance(command.to_user_id)?,
            recipient.created_by,
            &amount,
        )?;

        book.record(plan.granted.clone())?;
        book.record(plan.received.clone())?;
        LedgerRepository::persist(&mut tx, &book).await?;

        let now = Utc::now();
        let allocation = CreditAllocationRecord {
            id: plan.allocation_id,
            transaction_id: plan.allocator_transaction_id(),
            from_user_id: command.from_user_id,
            to_user_id: command.to_user_id,
            amount: plan.amount,
            outstanding: plan.amount,
            status: AllocationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        LedgerRepository::insert_allocation(&mut tx, &allocation).await?;

        let result = AllocationResult {
            allocation,
            from_balance: BalanceView::from(book.balance(command.from_user_id)?),
            to_balance: BalanceView::from(book.balance(command.to_user_id)?),
        };

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::CreditAllocated)
                .resource_type("CreditAllocation")
                .resource_id(plan.allocation_id)
                .after_state(&result),
            context,
        )
        .await?;

        complete_idempotency(&self.idempotency, &mut tx, idempotency_key, &result).await?;
        tx.commit().await?;

        tracing::info!(
            allocation_id = %plan.allocation_id,
            from_user_id = %command.from_user_id,
            to_user_id = %command.to_user_id,
            amount = %amount,
            "Credit allocated"
        );

        Ok(result)
    }
}
