//! UserBalance Aggregate
//!
//! One balance per profile. Commands validate the ledger rules and return
//! events; `apply` is the only place state changes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, BalanceEvent, DomainError, SignedAmount};

use super::Aggregate;

/// UserBalance Aggregate
///
/// `available_balance = current_balance - locked_amount`, where
/// `locked_amount` is what this user has lent out as credit and
/// `credit_limit` is what it has received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalance {
    user_id: Uuid,
    current_balance: Decimal,
    credit_limit: Decimal,
    locked_amount: Decimal,
    is_locked: bool,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for UserBalance {
    fn default() -> Self {
        Self {
            user_id: Uuid::nil(),
            current_balance: Decimal::ZERO,
            credit_limit: Decimal::ZERO,
            locked_amount: Decimal::ZERO,
            is_locked: false,
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

impl UserBalance {
    /// A fresh, empty, unlocked balance
    pub fn open(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            created_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Rebuild from a `user_balances` row
    #[allow(clippy::too_many_arguments)]
    pub fn from_db_state(
        user_id: Uuid,
        current_balance: Decimal,
        credit_limit: Decimal,
        locked_amount: Decimal,
        is_locked: bool,
        version: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            current_balance,
            credit_limit,
            locked_amount,
            is_locked,
            version,
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }
    }

    // =========================================================================
    // Derived figures
    // =========================================================================

    /// Current balance minus amounts locked by outstanding allocations
    pub fn available_balance(&self) -> Decimal {
        self.current_balance - self.locked_amount
    }

    /// How much may still be debited, credit included
    pub fn spendable(&self) -> Decimal {
        self.available_balance() + self.credit_limit
    }

    /// Credit actually drawn and owed back to the creator
    pub fn debt(&self) -> Decimal {
        let overdrawn = (-self.available_balance()).max(Decimal::ZERO);
        overdrawn.min(self.credit_limit)
    }

    fn ensure_unlocked(&self) -> Result<(), DomainError> {
        if self.is_locked {
            return Err(DomainError::balance_locked(self.user_id));
        }
        Ok(())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Credit external money. Debt repayment is planned separately with
    /// [`plan_repayment`] against the pre-top-up state.
    pub fn top_up(
        &self,
        amount: &Amount,
        transaction_id: Uuid,
        description: Option<String>,
    ) -> Result<BalanceEvent, DomainError> {
        self.ensure_unlocked()?;
        Ok(BalanceEvent::ToppedUp {
            user_id: self.user_id,
            amount: amount.value(),
            transaction_id,
            description,
            occurred_at: Utc::now(),
        })
    }

    /// Charge spending; may draw on the credit limit but never beyond it
    pub fn debit(
        &self,
        amount: &Amount,
        transaction_id: Uuid,
        description: Option<String>,
    ) -> Result<BalanceEvent, DomainError> {
        self.ensure_unlocked()?;
        if self.spendable() < amount.value() {
            return Err(DomainError::insufficient_balance(
                amount.value(),
                self.spendable(),
            ));
        }
        Ok(BalanceEvent::Debited {
            user_id: self.user_id,
            amount: amount.value(),
            transaction_id,
            description,
            occurred_at: Utc::now(),
        })
    }

    pub fn refund(
        &self,
        amount: &Amount,
        transaction_id: Uuid,
        description: Option<String>,
    ) -> Result<BalanceEvent, DomainError> {
        self.ensure_unlocked()?;
        Ok(BalanceEvent::Refunded {
            user_id: self.user_id,
            amount: amount.value(),
            transaction_id,
            description,
            occurred_at: Utc::now(),
        })
    }

    /// Administrative correction. Not bound by the credit limit.
    pub fn adjust(
        &self,
        delta: &SignedAmount,
        transaction_id: Uuid,
        reason: String,
    ) -> Result<BalanceEvent, DomainError> {
        self.ensure_unlocked()?;
        if reason.trim().is_empty() {
            return Err(DomainError::BusinessRuleViolation(
                "Adjustment reason is required".to_string(),
            ));
        }
        Ok(BalanceEvent::Adjusted {
            user_id: self.user_id,
            delta: delta.value(),
            transaction_id,
            reason,
            occurred_at: Utc::now(),
        })
    }

    /// Set the mutation gate; `None` toggles it.
    pub fn set_lock(&self, locked: Option<bool>) -> BalanceEvent {
        BalanceEvent::LockChanged {
            user_id: self.user_id,
            locked: locked.unwrap_or(!self.is_locked),
            occurred_at: Utc::now(),
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn current_balance(&self) -> Decimal {
        self.current_balance
    }

    pub fn credit_limit(&self) -> Decimal {
        self.credit_limit
    }

    pub fn locked_amount(&self) -> Decimal {
        self.locked_amount
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Aggregate for UserBalance {
    type Event = BalanceEvent;

    fn id(&self) -> Uuid {
        self.user_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        let occurred_at = event.occurred_at();
        match event {
            BalanceEvent::ToppedUp { amount, .. } | BalanceEvent::Refunded { amount, .. } => {
                self.current_balance += amount;
            }
            BalanceEvent::Debited { amount, .. } => {
                self.current_balance -= amount;
            }
            BalanceEvent::Adjusted { delta, .. } => {
                self.current_balance += delta;
            }
            BalanceEvent::CreditGranted { amount, .. } => {
                self.locked_amount += amount;
            }
            BalanceEvent::CreditReceived { amount, .. } => {
                self.credit_limit += amount;
            }
            BalanceEvent::RepaymentMade { amount, .. } => {
                if amount > self.credit_limit {
                    tracing::error!(
                        "Repayment {} exceeds credit limit {} for user {}",
                        amount,
                        self.credit_limit,
                        self.user_id
                    );
                }
                self.credit_limit = (self.credit_limit - amount).max(Decimal::ZERO);
            }
            BalanceEvent::RepaymentReceived { amount, .. } => {
                if amount > self.locked_amount {
                    tracing::error!(
                        "Repayment {} exceeds locked amount {} for user {}",
                        amount,
                        self.locked_amount,
                        self.user_id
                    );
                }
                self.locked_amount = (self.locked_amount - amount).max(Decimal::ZERO);
            }
            BalanceEvent::LockChanged { locked, .. } => {
                self.is_locked = locked;
            }
        }

        self.version += 1;
        self.updated_at = Some(occurred_at);
        self
    }
}

// =========================================================================
// Credit allocation
// =========================================================================

/// Both sides of a validated credit allocation
#[derive(Debug, Clone, PartialEq)]
pub struct CreditAllocationPlan {
    pub allocation_id: Uuid,
    pub amount: Decimal,
    pub granted: BalanceEvent,
    pub received: BalanceEvent,
}

impl CreditAllocationPlan {
    /// Ledger row id of the allocator-side entry
    pub fn allocator_transaction_id(&self) -> Uuid {
        self.granted
            .transaction_id()
            .unwrap_or(self.allocation_id)
    }
}

/// Validate and plan a credit allocation from `from` to `to`.
///
/// `to_created_by` is the recipient's creator as stored on its profile.
pub fn allocate_credit(
    from: &UserBalance,
    to: &UserBalance,
    to_created_by: Option<Uuid>,
    amount: &Amount,
) -> Result<CreditAllocationPlan, DomainError> {
    if from.user_id == to.user_id {
        return Err(DomainError::SelfAllocation);
    }
    if to_created_by != Some(from.user_id) {
        return Err(DomainError::NotCreator {
            allocator: from.user_id,
            recipient: to.user_id,
        });
    }
    from.ensure_unlocked()?;
    to.ensure_unlocked()?;

    // Only own funds can back credit; received credit is not re-lendable
    if from.available_balance() < amount.value() {
        return Err(DomainError::insufficient_balance(
            amount.value(),
            from.available_balance(),
        ));
    }

    let allocation_id = Uuid::new_v4();
    let occurred_at = Utc::now();

    Ok(CreditAllocationPlan {
        allocation_id,
        amount: amount.value(),
        granted: BalanceEvent::CreditGranted {
            user_id: from.user_id,
            to_user_id: to.user_id,
            allocation_id,
            amount: amount.value(),
            transaction_id: Uuid::new_v4(),
            occurred_at,
        },
        received: BalanceEvent::CreditReceived {
            user_id: to.user_id,
            from_user_id: from.user_id,
            allocation_id,
            amount: amount.value(),
            transaction_id: Uuid::new_v4(),
            occurred_at,
        },
    })
}

// =========================================================================
// Debt repayment
// =========================================================================

/// An active allocation received by the user being topped up
#[derive(Debug, Clone, PartialEq)]
pub struct OutstandingAllocation {
    pub allocation_id: Uuid,
    pub from_user_id: Uuid,
    pub outstanding: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Portion of a top-up applied to one allocation
#[derive(Debug, Clone, PartialEq)]
pub struct RepaymentSlice {
    pub allocation_id: Uuid,
    pub creator_id: Uuid,
    pub amount: Decimal,
    /// Outstanding on the allocation after this slice
    pub remaining: Decimal,
}

impl RepaymentSlice {
    /// Debtor-side and creator-side events for this slice
    pub fn events(&self, debtor_id: Uuid) -> (BalanceEvent, BalanceEvent) {
        let occurred_at = Utc::now();
        (
            BalanceEvent::RepaymentMade {
                user_id: debtor_id,
                to_user_id: self.creator_id,
                allocation_id: self.allocation_id,
                amount: self.amount,
                transaction_id: Uuid::new_v4(),
                occurred_at,
            },
            BalanceEvent::RepaymentReceived {
                user_id: self.creator_id,
                from_user_id: debtor_id,
                allocation_id: self.allocation_id,
                amount: self.amount,
                transaction_id: Uuid::new_v4(),
                occurred_at,
            },
        )
    }
}

/// Split the repayable part of a top-up across allocations, oldest first.
///
/// `before` is the debtor's state prior to the top-up. The repayable part is
/// `min(top_up, debt)`; anything left after that stays with the user.
pub fn plan_repayment(
    before: &UserBalance,
    top_up: &Amount,
    allocations: &[OutstandingAllocation],
) -> Vec<RepaymentSlice> {
    let mut remaining = top_up.value().min(before.debt());
    if remaining <= Decimal::ZERO {
        return Vec::new();
    }

    let mut ordered: Vec<&OutstandingAllocation> = allocations
        .iter()
        .filter(|a| a.outstanding > Decimal::ZERO)
        .collect();
    ordered.sort_by_key(|a| a.created_at);

    let mut slices = Vec::new();
    for allocation in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let slice = remaining.min(allocation.outstanding);
        remaining -= slice;
        slices.push(RepaymentSlice {
            allocation_id: allocation.allocation_id,
            creator_id: allocation.from_user_id,
            amount: slice,
            remaining: allocation.outstanding - slice,
        });
    }
    slices
}
