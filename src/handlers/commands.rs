//! Command definitions
//!
//! Commands represent intentions to change the ledger. Amounts arrive as
//! strings and are validated by the handler.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{BalanceView, CreditAllocationRecord, LedgerEntry};
use crate::profile::Role;

/// Credit external money to a balance, repaying debt first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpCommand {
    pub user_id: Uuid,
    pub amount: String,
    pub description: Option<String>,
}

impl TopUpCommand {
    pub fn new(user_id: Uuid, amount: String) -> Self {
        Self {
            user_id,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Spend from a balance, drawing on received credit if needed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebitCommand {
    pub user_id: Uuid,
    pub amount: String,
    pub description: Option<String>,
}

impl DebitCommand {
    pub fn new(user_id: Uuid, amount: String) -> Self {
        Self {
            user_id,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Give money back to a balance without repaying debt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCommand {
    pub user_id: Uuid,
    pub amount: String,
    pub description: Option<String>,
}

impl RefundCommand {
    pub fn new(user_id: Uuid, amount: String) -> Self {
        Self {
            user_id,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// Signed administrative correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustBalanceCommand {
    pub user_id: Uuid,
    /// Signed delta, e.g. "-12.5"
    pub amount: String,
    pub reason: String,
}

impl AdjustBalanceCommand {
    pub fn new(user_id: Uuid, amount: String, reason: String) -> Self {
        Self {
            user_id,
            amount,
            reason,
        }
    }
}

/// Lend part of the creator's available balance to a user it created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateCreditCommand {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: String,
}

impl AllocateCreditCommand {
    pub fn new(from_user_id: Uuid, to_user_id: Uuid, amount: String) -> Self {
        Self {
            from_user_id,
            to_user_id,
            amount,
        }
    }
}

/// Set or toggle the mutation gate of a balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockBalanceCommand {
    pub user_id: Uuid,
    /// `None` toggles
    pub locked: Option<bool>,
}

impl LockBalanceCommand {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            locked: None,
        }
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }
}

/// Create a profile owned by the acting user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileCommand {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
}

impl CreateProfileCommand {
    pub fn new(user_id: Uuid, username: String, email: String) -> Self {
        Self {
            user_id,
            username,
            email,
            display_name: None,
            role: Role::User,
        }
    }

    pub fn with_display_name(mut self, display_name: String) -> Self {
        self.display_name = Some(display_name);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Result of a top-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpResult {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    /// Part of the top-up that went to creators
    pub repaid: Decimal,
    pub repayments: Vec<RepaymentSummary>,
    pub balance: BalanceView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepaymentSummary {
    pub allocation_id: Uuid,
    pub creator_id: Uuid,
    pub amount: Decimal,
    pub remaining: Decimal,
}

/// Result of a debit, refund or adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChangeResult {
    pub transaction: LedgerEntry,
    pub balance: BalanceView,
}

/// Result of a credit allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub allocation: CreditAllocationRecord,
    pub from_balance: BalanceView,
    pub to_balance: BalanceView,
}

/// Result of a lock change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockResult {
    pub user_id: Uuid,
    pub is_locked: bool,
    pub balance: BalanceView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_up_command() {
        let cmd = TopUpCommand::new(Uuid::new_v4(), "100.00".to_string())
            .with_description("Bank transfer".to_string());

        assert_eq!(cmd.amount, "100.00");
        assert_eq!(cmd.description, Some("Bank transfer".to_string()));
    }

    #[test]
    fn test_lock_command_defaults_to_toggle() {
        let cmd = LockBalanceCommand::new(Uuid::new_v4());
        assert_eq!(cmd.locked, None);
        assert_eq!(cmd.with_locked(true).locked, Some(true));
    }

    #[test]
    fn test_create_profile_command_defaults_to_user_role() {
        let cmd = CreateProfileCommand::new(
            Uuid::new_v4(),
            "acme".to_string(),
            "ops@acme.test".to_string(),
        );
        assert_eq!(cmd.role, Role::User);
        assert_eq!(cmd.with_role(Role::Reseller).role, Role::Reseller);
    }
}
