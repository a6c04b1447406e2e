//! Balance Query Handler
//!
//! Read side: balances, transaction history and credit allocations, each
//! gated by the view rule (self, creator or admin).

use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::ledger::{
    AllocationDirection, BalanceView, CreditAllocationRecord, LedgerEntry, LedgerRepository,
    TransactionFilter,
};
use crate::profile::ProfileRepository;

use super::access::{acting_user, ensure_can_view};

pub struct BalanceQueryHandler {
    ledger: LedgerRepository,
    profiles: ProfileRepository,
}

impl BalanceQueryHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: LedgerRepository::new(pool.clone()),
            profiles: ProfileRepository::new(pool),
        }
    }

    async fn authorize(&self, user_id: Uuid, context: &OperationContext) -> Result<(), AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self
            .profiles
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;
        ensure_can_view(&actor, &target)
    }

    /// Balance with derived figures, created empty on first access
    pub async fn get_balance(
        &self,
        user_id: Uuid,
        context: &OperationContext,
    ) -> Result<BalanceView, AppError> {
        self.authorize(user_id, context).await?;
        let balance = self.ledger.get_or_create_balance(user_id).await?;
        Ok(BalanceView::from(&balance))
    }

    pub async fn get_transactions(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
        context: &OperationContext,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        self.authorize(user_id, context).await?;
        self.ledger.list_transactions(user_id, filter).await
    }

    pub async fn list_allocations(
        &self,
        user_id: Uuid,
        direction: AllocationDirection,
        context: &OperationContext,
    ) -> Result<Vec<CreditAllocationRecord>, AppError> {
        self.authorize(user_id, context).await?;
        self.ledger.list_allocations(user_id, direction).await
    }
}
