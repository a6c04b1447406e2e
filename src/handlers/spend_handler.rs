//! Spend Handler
//!
//! Single-balance money movements: debit, refund and administrative
//! adjustment. None of them triggers debt repayment.

use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::UserBalance;
use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{Amount, BalanceEvent, DomainError, OperationContext, SignedAmount};
use crate::error::AppError;
use crate::idempotency::IdempotencyRepository;
use crate::ledger::{BalanceView, LedgerRepository};
use crate::profile::ProfileRepository;

use super::access::{acting_user, ensure_can_adjust, ensure_can_debit, ensure_can_refund};
use super::{
    claim_idempotency, complete_idempotency, with_retry, AdjustBalanceCommand,
    BalanceChangeResult, DebitCommand, RefundCommand,
};

/// What to do to the locked balance
#[derive(Debug, Clone, Copy)]
enum Movement<'a> {
    Debit(&'a Amount, Option<&'a str>),
    Refund(&'a Amount, Option<&'a str>),
    Adjust(&'a SignedAmount, &'a str),
}

impl Movement<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Movement::Debit(..) => "debit",
            Movement::Refund(..) => "refund",
            Movement::Adjust(..) => "adjust_balance",
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Movement::Debit(..) => AuditAction::BalanceDebited,
            Movement::Refund(..) => AuditAction::BalanceRefunded,
            Movement::Adjust(..) => AuditAction::BalanceAdjusted,
        }
    }

    fn event(&self, balance: &UserBalance, transaction_id: Uuid) -> Result<BalanceEvent, DomainError> {
        match *self {
            Movement::Debit(amount, description) => {
                balance.debit(amount, transaction_id, description.map(str::to_string))
            }
            Movement::Refund(amount, description) => {
                balance.refund(amount, transaction_id, description.map(str::to_string))
            }
            Movement::Adjust(delta, reason) => {
                balance.adjust(delta, transaction_id, reason.to_string())
            }
        }
    }
}

pub struct SpendHandler {
    ledger: LedgerRepository,
    profiles: ProfileRepository,
    idempotency: IdempotencyRepository,
}

impl SpendHandler {
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

    pub async fn debit(
        &self,
        command: DebitCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<BalanceChangeResult, AppError> {
        let amount: Amount = command.amount.parse()?;

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self.profiles.get_active(command.user_id).await?;
        ensure_can_debit(context, &actor, &target)?;

        let movement = Movement::Debit(&amount, command.description.as_deref());
        with_retry("debit", || {
            self.try_execute(command.user_id, movement, &command, idempotency_key, context)
        })
        .await
    }

    pub async fn refund(
        &self,
        command: RefundCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<BalanceChangeResult, AppError> {
        let amount: Amount = command.amount.parse()?;

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self.profiles.get_active(command.user_id).await?;
        ensure_can_refund(context, &actor, &target)?;

        let movement = Movement::Refund(&amount, command.description.as_deref());
        with_retry("refund", || {
            self.try_execute(command.user_id, movement, &command, idempotency_key, context)
        })
        .await
    }

    pub async fn adjust(
        &self,
        command: AdjustBalanceCommand,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<BalanceChangeResult, AppError> {
        let delta: SignedAmount = command.amount.parse()?;

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        self.profiles.get_active(command.user_id).await?;
        ensure_can_adjust(context, &actor)?;

        let movement = Movement::Adjust(&delta, &command.reason);
        with_retry("adjust_balance", || {
            self.try_execute(command.user_id, movement, &command, idempotency_key, context)
        })
        .await
    }

    async fn try_execute<C: serde::Serialize>(
        &self,
        user_id: Uuid,
        movement: Movement<'_>,
        command: &C,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<BalanceChangeResult, AppError> {
        let mut tx = self.ledger.begin().await?;

        if let Some(replayed) = claim_idempotency(
            &self.idempotency,
            &mut tx,
            idempotency_key,
            movement.operation(),
            command,
            context,
        )
        .await?
        {
            return Ok(replayed);
        }

        let mut book = LedgerRepository::lock_balances(&mut tx, &[user_id]).await?;
        let before = book.balance(user_id)?.clone();
        let event = movement.event(&before, Uuid::new_v4())?;
        let after = book.record(event)?.clone();
        LedgerRepository::persist(&mut tx, &book).await?;

        let transaction = book
            .entries()
            .last()
            .cloned()
            .ok_or_else(|| AppError::Internal("Balance change produced no ledger row".to_string()))?;

        let result = BalanceChangeResult {
            transaction,
            balance: BalanceView::from(&after),
        };

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(movement.audit_action())
                .resource_type("UserBalance")
                .resource_id(user_id)
                .before_state(&BalanceView::from(&before))
                .after_state(&result),
            context,
        )
        .await?;

        complete_idempotency(&self.idempotency, &mut tx, idempotency_key, &result).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            operation = movement.operation(),
            transaction_id = %result.transaction.id,
            balance_after = %after.current_balance(),
            "Balance changed"
        );

        Ok(result)
    }
}
