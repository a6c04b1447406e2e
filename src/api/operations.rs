//! Balance operations dispatcher
//!
//! `POST /balance-operations` takes one flat body naming an operation and
//! routes it to the matching handler. The admin panel talks to the ledger
//! through this endpoint.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{AmountInput, OperationContext, TransactionType};
use crate::error::AppError;
use crate::handlers::access::acting_user;
use crate::handlers::{
    AllocateCreditCommand, AllocateCreditHandler, BalanceQueryHandler, DebitCommand,
    LockBalanceCommand, LockBalanceHandler, RefundCommand, SpendHandler, TopUpCommand,
    TopUpHandler,
};
use crate::ledger::TransactionFilter;

use super::AppState;

/// Wire body of the dispatcher
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceOperationRequest {
    pub operation: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub to_user_id: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<AmountInput>,
    #[serde(default)]
    pub locked: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default, rename = "type")]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A parsed dispatcher request
#[derive(Debug, Clone)]
pub enum BalanceOperation {
    GetBalance { user_id: Uuid },
    TopUp(TopUpCommand),
    AllocateCredit(AllocateCreditCommand),
    GetTransactions { user_id: Uuid, filter: TransactionFilter },
    LockBalance(LockBalanceCommand),
    Debit(DebitCommand),
    Refund(RefundCommand),
}

impl BalanceOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BalanceOperation::GetBalance { .. } => "get_balance",
            BalanceOperation::TopUp(_) => "top_up",
            BalanceOperation::AllocateCredit(_) => "allocate_credit",
            BalanceOperation::GetTransactions { .. } => "get_transactions",
            BalanceOperation::LockBalance(_) => "lock_balance",
            BalanceOperation::Debit(_) => "debit",
            BalanceOperation::Refund(_) => "refund",
        }
    }
}

fn required<T>(value: Option<T>, field: &str, operation: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::InvalidRequest(format!("{} requires {}", operation, field)))
}

impl BalanceOperationRequest {
    /// Resolve defaults against the acting user and check required fields
    pub fn into_operation(self, actor: Uuid) -> Result<BalanceOperation, AppError> {
        let user_id = self.user_id.unwrap_or(actor);
        let op = self.operation.as_str();

        let operation = match op {
            "get_balance" => BalanceOperation::GetBalance { user_id },
            "top_up" => {
                let amount = required(self.amount, "amount", op)?.into_text();
                BalanceOperation::TopUp(TopUpCommand {
                    user_id,
                    amount,
                    description: self.description,
                })
            }
            "allocate_credit" => {
                let to_user_id = required(self.to_user_id, "to_user_id", op)?;
                let amount = required(self.amount, "amount", op)?.into_text();
                // The giver is always the caller
                BalanceOperation::AllocateCredit(AllocateCreditCommand::new(actor, to_user_id, amount))
            }
            "get_transactions" => BalanceOperation::GetTransactions {
                user_id,
                filter: TransactionFilter {
                    limit: self.limit,
                    offset: self.offset,
                    transaction_type: self.transaction_type,
                },
            },
            "lock_balance" => BalanceOperation::LockBalance(LockBalanceCommand {
                user_id,
                locked: self.locked,
            }),
            "debit" => {
                let amount = required(self.amount, "amount", op)?.into_text();
                BalanceOperation::Debit(DebitCommand {
                    user_id,
                    amount,
                    description: self.description,
                })
            }
            "refund" => {
                let amount = required(self.amount, "amount", op)?.into_text();
                BalanceOperation::Refund(RefundCommand {
                    user_id,
                    amount,
                    description: self.description,
                })
            }
            other => return Err(AppError::InvalidOperation(other.to_string())),
        };

        Ok(operation)
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))
}

/// Run one operation and return its operation-specific JSON
pub async fn dispatch(
    state: &AppState,
    request: BalanceOperationRequest,
    idempotency_key: Option<Uuid>,
    context: &OperationContext,
) -> Result<Value, AppError> {
    let operation = request.into_operation(acting_user(context)?)?;
    let pool = state.pool.clone();
    let ttl = state.idempotency_ttl_hours;

    tracing::debug!(operation = operation.name(), "Dispatching balance operation");

    match operation {
        BalanceOperation::GetBalance { user_id } => {
            to_json(BalanceQueryHandler::new(pool).get_balance(user_id, context).await?)
        }
        BalanceOperation::GetTransactions { user_id, filter } => to_json(
            BalanceQueryHandler::new(pool)
                .get_transactions(user_id, &filter, context)
                .await?,
        ),
        BalanceOperation::TopUp(command) => to_json(
            TopUpHandler::new(pool)
                .with_idempotency_ttl(ttl)
                .execute(command, idempotency_key, context)
                .await?,
        ),
        BalanceOperation::AllocateCredit(command) => to_json(
            AllocateCreditHandler::new(pool)
                .with_idempotency_ttl(ttl)
                .execute(command, idempotency_key, context)
                .await?,
        ),
        BalanceOperation::LockBalance(command) => {
            to_json(LockBalanceHandler::new(pool).execute(command, context).await?)
        }
        BalanceOperation::Debit(command) => to_json(
            SpendHandler::new(pool)
                .with_idempotency_ttl(ttl)
                .debit(command, idempotency_key, context)
                .await?,
        ),
        BalanceOperation::Refund(command) => to_json(
            SpendHandler::new(pool)
                .with_idempotency_ttl(ttl)
                .refund(command, idempotency_key, context)
                .await?,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> BalanceOperationRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_user_id_defaults_to_actor() {
        let actor = Uuid::new_v4();
        let op = parse(r#"{"operation": "get_balance"}"#)
            .into_operation(actor)
            .unwrap();
        assert!(matches!(op, BalanceOperation::GetBalance { user_id } if user_id == actor));
    }

    #[test]
    fn test_top_up_accepts_numeric_amount() {
        let user = Uuid::new_v4();
        let json = format!(
            r#"{{"operation": "top_up", "user_id": "{}", "amount": 12.5, "description": "wire"}}"#,
            user
        );
        match parse(&json).into_operation(Uuid::new_v4()).unwrap() {
            BalanceOperation::TopUp(cmd) => {
                assert_eq!(cmd.user_id, user);
                assert_eq!(cmd.amount, "12.5");
                assert_eq!(cmd.description.as_deref(), Some("wire"));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_allocate_credit_gives_from_actor() {
        let actor = Uuid::new_v4();
        let to = Uuid::new_v4();
        let json = format!(
            r#"{{"operation": "allocate_credit", "to_user_id": "{}", "amount": "250"}}"#,
            to
        );
        match parse(&json).into_operation(actor).unwrap() {
            BalanceOperation::AllocateCredit(cmd) => {
                assert_eq!(cmd.from_user_id, actor);
                assert_eq!(cmd.to_user_id, to);
                assert_eq!(cmd.amount, "250");
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_get_transactions_filter() {
        let op = parse(r#"{"operation": "get_transactions", "limit": 500, "type": "auto_repayment"}"#)
            .into_operation(Uuid::new_v4())
            .unwrap();
        match op {
            BalanceOperation::GetTransactions { filter, .. } => {
                assert_eq!(filter.limit(), 200);
                assert_eq!(filter.offset(), 0);
                assert_eq!(filter.transaction_type, Some(TransactionType::AutoRepayment));
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn test_lock_balance_without_flag_toggles() {
        let op = parse(r#"{"operation": "lock_balance"}"#)
            .into_operation(Uuid::new_v4())
            .unwrap();
        assert!(matches!(op, BalanceOperation::LockBalance(LockBalanceCommand { locked: None, .. })));
    }

    #[test]
    fn test_missing_amount_is_invalid_request() {
        let result = parse(r#"{"operation": "debit"}"#).into_operation(Uuid::new_v4());
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));

        let result = parse(r#"{"operation": "allocate_credit", "amount": "5"}"#)
            .into_operation(Uuid::new_v4());
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_unknown_operation() {
        let result = parse(r#"{"operation": "transfer"}"#).into_operation(Uuid::new_v4());
        match result {
            Err(AppError::InvalidOperation(name)) => assert_eq!(name, "transfer"),
            other => panic!("expected invalid operation, got {:?}", other),
        }
    }
}
