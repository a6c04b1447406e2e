//! Ledger Book
//!
//! In-memory working set for one database transaction: the locked balances,
//! the events recorded against them, and the ledger rows they produce.

use std::collections::HashMap;

use uuid::Uuid;

use crate::aggregate::{Aggregate, UserBalance};
use crate::domain::{BalanceEvent, DomainError};

use super::LedgerEntry;

#[derive(Debug, Default)]
pub struct LedgerBook {
    balances: HashMap<Uuid, UserBalance>,
    loaded_versions: HashMap<Uuid, i64>,
    entries: Vec<LedgerEntry>,
    events: Vec<BalanceEvent>,
}

impl LedgerBook {
    pub fn new(balances: impl IntoIterator<Item = UserBalance>) -> Self {
        let mut book = Self::default();
        for balance in balances {
            book.loaded_versions
                .insert(balance.user_id(), balance.version());
            book.balances.insert(balance.user_id(), balance);
        }
        book
    }

    /// Balance of a user loaded into this book
    pub fn balance(&self, user_id: Uuid) -> Result<&UserBalance, DomainError> {
        self.balances.get(&user_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!("balance for {} not loaded", user_id))
        })
    }

    /// Apply an event to its balance and capture the ledger row
    pub fn record(&mut self, event: BalanceEvent) -> Result<&UserBalance, DomainError> {
        let user_id = event.user_id();
        let before = self.balances.remove(&user_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!("balance for {} not loaded", user_id))
        })?;

        let after = before.clone().apply(event.clone());
        if let Some(entry) = LedgerEntry::from_transition(&before, &after, &event) {
            self.entries.push(entry);
        }
        self.events.push(event);

        Ok(self.balances.entry(user_id).or_insert(after))
    }

    /// Balances touched by recorded events, with the version they were loaded at
    pub fn changed(&self) -> impl Iterator<Item = (&UserBalance, i64)> {
        self.balances.values().filter_map(|balance| {
            let loaded = self
                .loaded_versions
                .get(&balance.user_id())
                .copied()
                .unwrap_or_default();
            (balance.version() != loaded).then_some((balance, loaded))
        })
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn events(&self) -> &[BalanceEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::allocate_credit;
    use crate::domain::{Amount, TransactionType};
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_unknown_balance_fails() {
        let mut book = LedgerBook::new(Vec::new());
        let stray = UserBalance::open(Uuid::new_v4());
        let event = stray.set_lock(Some(true));

        assert!(matches!(
            book.record(event),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_allocation_produces_two_entries() {
        let creator = UserBalance::open(Uuid::new_v4());
        let creator = creator.clone().apply(
            creator
                .top_up(&Amount::new(dec!(100)).unwrap(), Uuid::new_v4(), None)
                .unwrap(),
        );
        let user = UserBalance::open(Uuid::new_v4());
        let plan = allocate_credit(
            &creator,
            &user,
            Some(creator.user_id()),
            &Amount::new(dec!(60)).unwrap(),
        )
        .unwrap();

        let mut book = LedgerBook::new(vec![creator.clone(), user.clone()]);
        book.record(plan.granted.clone()).unwrap();
        book.record(plan.received.clone()).unwrap();

        assert_eq!(book.entries().len(), 2);
        assert!(book
            .entries()
            .iter()
            .all(|e| e.transaction_type == TransactionType::CreditAllocation));
        assert_eq!(book.balance(creator.user_id()).unwrap().available_balance(), dec!(40));
        assert_eq!(book.balance(user.user_id()).unwrap().credit_limit(), dec!(60));
        assert_eq!(book.changed().count(), 2);
        assert_eq!(book.events().len(), 2);
    }

    #[test]
    fn test_untouched_balances_are_not_changed() {
        let a = UserBalance::open(Uuid::new_v4());
        let b = UserBalance::open(Uuid::new_v4());
        let mut book = LedgerBook::new(vec![a.clone(), b]);

        book.record(a.set_lock(Some(true))).unwrap();

        let changed: Vec<_> = book.changed().collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].0.user_id(), a.user_id());
        assert_eq!(changed[0].1, 0);
        assert!(book.entries().is_empty());
    }
}
