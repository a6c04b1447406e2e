//! Ledger read/write models
//!
//! Rows of `transactions` and `credit_allocations`, plus the balance view
//! returned by the API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::aggregate::UserBalance;
use crate::domain::{AllocationStatus, BalanceEvent, TransactionStatus, TransactionType};

/// Upper bound for one page of ledger rows
pub const MAX_PAGE_SIZE: i64 = 200;

/// Default page size
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// One immutable `transactions` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub related_user_id: Option<Uuid>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Ledger row for `event` moving `before` to `after`; `None` when the
    /// event moves no money.
    pub fn from_transition(
        before: &UserBalance,
        after: &UserBalance,
        event: &BalanceEvent,
    ) -> Option<Self> {
        let transaction_type = event.transaction_type()?;
        let id = event.transaction_id()?;
        let amount = event.amount()?;

        let mut metadata = json!({
            "credit_limit_before": before.credit_limit(),
            "credit_limit_after": after.credit_limit(),
            "locked_amount_before": before.locked_amount(),
            "locked_amount_after": after.locked_amount(),
        });
        if let Some(allocation_id) = event.allocation_id() {
            metadata["allocation_id"] = json!(allocation_id);
        }

        Some(Self {
            id,
            user_id: event.user_id(),
            transaction_type,
            amount,
            balance_before: before.current_balance(),
            balance_after: after.current_balance(),
            related_user_id: event.related_user_id(),
            status: TransactionStatus::Completed,
            description: event.description(),
            metadata,
            created_at: event.occurred_at(),
        })
    }
}

/// One `credit_allocations` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreditAllocationRecord {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Decimal,
    pub outstanding: Decimal,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Balance as shown to API clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: Uuid,
    pub current_balance: Decimal,
    pub credit_limit: Decimal,
    pub locked_amount: Decimal,
    pub available_balance: Decimal,
    pub spendable: Decimal,
    pub debt: Decimal,
    pub is_locked: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&UserBalance> for BalanceView {
    fn from(balance: &UserBalance) -> Self {
        Self {
            user_id: balance.user_id(),
            current_balance: balance.current_balance(),
            credit_limit: balance.credit_limit(),
            locked_amount: balance.locked_amount(),
            available_balance: balance.available_balance(),
            spendable: balance.spendable(),
            debt: balance.debt(),
            is_locked: balance.is_locked(),
            updated_at: balance.updated_at(),
        }
    }
}

/// Paging and filtering for transaction history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
}

impl TransactionFilter {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Which side of an allocation to list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationDirection {
    Granted,
    #[default]
    Received,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::domain::Amount;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_from_top_up() {
        let before = UserBalance::open(Uuid::new_v4());
        let event = before
            .top_up(&Amount::new(dec!(25)).unwrap(), Uuid::new_v4(), Some("card".to_string()))
            .unwrap();
        let after = before.clone().apply(event.clone());

        let entry = LedgerEntry::from_transition(&before, &after, &event).unwrap();
        assert_eq!(entry.transaction_type, TransactionType::TopUp);
        assert_eq!(entry.amount, dec!(25));
        assert_eq!(entry.balance_before, Decimal::ZERO);
        assert_eq!(entry.balance_after, dec!(25));
        assert_eq!(entry.status, TransactionStatus::Completed);
        assert_eq!(entry.description.as_deref(), Some("card"));
        assert!(entry.metadata.get("allocation_id").is_none());
    }

    #[test]
    fn test_lock_change_has_no_entry() {
        let before = UserBalance::open(Uuid::new_v4());
        let event = before.set_lock(Some(true));
        let after = before.clone().apply(event.clone());
        assert!(LedgerEntry::from_transition(&before, &after, &event).is_none());
    }

    #[test]
    fn test_filter_clamps_paging() {
        let filter = TransactionFilter {
            limit: Some(10_000),
            offset: Some(-4),
            transaction_type: None,
        };
        assert_eq!(filter.limit(), MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);
        assert_eq!(TransactionFilter::default().limit(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_balance_view_derives_figures() {
        let balance = UserBalance::from_db_state(
            Uuid::new_v4(),
            dec!(100),
            dec!(40),
            dec!(30),
            false,
            3,
            Utc::now(),
            Utc::now(),
        );
        let view = BalanceView::from(&balance);
        assert_eq!(view.available_balance, dec!(70));
        assert_eq!(view.spendable, dec!(110));
        assert_eq!(view.debt, Decimal::ZERO);
    }
}
