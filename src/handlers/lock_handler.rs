//! Lock Handler
//!
//! Sets or toggles the mutation gate of a balance.

use sqlx::PgPool;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::ledger::{BalanceView, LedgerRepository};
use crate::profile::ProfileRepository;

use super::access::{acting_user, ensure_can_manage};
use super::{with_retry, LockBalanceCommand, LockResult};

pub struct LockBalanceHandler {
    ledger: LedgerRepository,
    profiles: ProfileRepository,
}

impl LockBalanceHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: LedgerRepository::new(pool.clone()),
            profiles: ProfileRepository::new(pool),
        }
    }

    pub async fn execute(
        &self,
        command: LockBalanceCommand,
        context: &OperationContext,
    ) -> Result<LockResult, AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self.profiles.get_active(command.user_id).await?;
        ensure_can_manage(&actor, &target)?;

        with_retry("lock_balance", || self.try_execute(&command, context)).await
    }

    async fn try_execute(
        &self,
        command: &LockBalanceCommand,
        context: &OperationContext,
    ) -> Result<LockResult, AppError> {
        let mut tx = self.ledger.begin().await?;
        let mut book = LedgerRepository::lock_balances(&mut tx, &[command.user_id]).await?;

        let before = book.balance(command.user_id)?.clone();
        let after = book.record(before.set_lock(command.locked))?.clone();
        LedgerRepository::persist(&mut tx, &book).await?;

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::BalanceLockChanged)
                .resource_type("UserBalance")
                .resource_id(command.user_id)
                .before_state(&BalanceView::from(&before))
                .after_state(&BalanceView::from(&after))
                .changed_fields(vec!["is_locked".to_string()]),
            context,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %command.user_id,
            is_locked = after.is_locked(),
            "Balance lock changed"
        );

        Ok(LockResult {
            user_id: command.user_id,
            is_locked: after.is_locked(),
            balance: BalanceView::from(&after),
        })
    }
}

