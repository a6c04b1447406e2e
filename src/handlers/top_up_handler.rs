//! Top-up Handler
//!
//! Credits a balance and applies the repayable part of the top-up to the
//! user's outstanding credit, oldest allocation first.

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::plan_repayment;
use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{Amount, OperationContext};
use crate::error::AppError;
use crate::idempotency::IdempotencyRepository;
use crate::ledger::{BalanceView, LedgerRepository};
use crate::profile::ProfileRepository;

use super::access::{acting_user, ensure_can_top_up};
use super::{
    claim_idempotency, complete_idempotency, with_retry, RepaymentSummary, TopUpCommand,
    TopUpResult,
};

pub struct TopUpHandler {
    ledger: LedgerRepository,
    profiles: ProfileRepository,
    idempotency: IdempotencyRepository,
}

impl TopUpHandler {
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
        command: TopUpCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<TopUpResult, AppError> {
        let amount: Amount = command.amount.parse()?;

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self.profiles.get_active(command.user_id).await?;
        ensure_can_top_up(context, &actor, &target)?;

        with_retry("top_up", || {
            self.try_execute(&command, amount, target.created_by, idempotency_key, context)
        })
        .await
    }

    async fn try_execute(
        &self,
        command: &TopUpCommand,
        amount: Amount,
        creator: Option<Uuid>,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<TopUpResult, AppError> {
        let mut tx = self.ledger.begin().await?;

        if let Some(replayed) = claim_idempotency(
            &self.idempotency,
            &mut tx,
            idempotency_key,
            "top_up",
            command,
            context,
        )
        .await?
        {
            return Ok(replayed);
        }

        // Only the creator allocates to a user, so locking both balances
        // first freezes the allocation list read below
        let mut user_ids: Vec<Uuid> = std::iter::once(command.user_id).chain(creator).collect();
        let mut book = LedgerRepository::lock_balances(&mut tx, &user_ids).await?;
        let outstanding = LedgerRepository::outstanding_allocations(&mut tx, command.user_id).await?;

        let lenders: Vec<Uuid> = outstanding
            .iter()
            .map(|a| a.from_user_id)
            .filter(|id| !user_ids.contains(id))
            .collect();
        if !lenders.is_empty() {
            user_ids.extend(lenders);
            book = LedgerRepository::lock_balances(&mut tx, &user_ids).await?;
        }

        let before = book.balance(command.user_id)?.clone();
        let transaction_id = Uuid::new_v4();
        let event = before.top_up(&amount, transaction_id, command.description.clone())?;
        let slices = plan_repayment(&before, &amount, &outstanding);

        book.record(event)?;
        for slice in &slices {
            let (made, received) = slice.events(command.user_id);
            book.record(made)?;
            book.record(received)?;
        }

        LedgerRepository::persist(&mut tx, &book).await?;
        for slice in &slices {
            LedgerRepository::apply_repayment(&mut tx, slice).await?;
        }

        let repayments: Vec<RepaymentSummary> = slices
            .iter()
            .map(|s| RepaymentSummary {
                allocation_id: s.allocation_id,
                creator_id: s.creator_id,
                amount: s.amount,
                remaining: s.remaining,
            })
            .collect();

        let result = TopUpResult {
            transaction_id,
            user_id: command.user_id,
            amount: amount.value(),
            repaid: repayments.iter().map(|r| r.amount).sum(),
            repayments,
            balance: BalanceView::from(book.balance(command.user_id)?),
        };

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::BalanceToppedUp)
                .resource_type("UserBalance")
                .resource_id(command.user_id)
                .before_state(&BalanceView::from(&before))
                .after_state(&result),
            context,
        )
        .await?;

        for slice in &slices {
            let creator = book.balance(slice.creator_id)?;
            AuditLogService::log_in(
                &mut tx,
                AuditLogBuilder::new(AuditAction::CreditRepaid)
                    .resource_type("CreditAllocation")
                    .resource_id(slice.allocation_id)
                    .after_state(&BalanceView::from(creator)),
                context,
            )
            .await?;
        }

        complete_idempotency(&self.idempotency, &mut tx, idempotency_key, &result).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %command.user_id,
            transaction_id = %transaction_id,
            amount = %amount,
            repaid = %result.repaid,
            "Balance topped up"
        );

        Ok(result)
    }
}
