//! Ledger Integration Tests
//!
//! Handler-level checks against a real database: concurrent writers,
//! lock ordering between handlers and oldest-first repayment across
//! several allocations.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use reseller_ledger::domain::{AllocationStatus, TransactionType};
use reseller_ledger::handlers::{
    AllocateCreditCommand, AllocateCreditHandler, BalanceQueryHandler, CreateProfileCommand,
    DebitCommand, ProfileHandler, SpendHandler, TopUpCommand, TopUpHandler,
};
use reseller_ledger::ledger::{AllocationDirection, TransactionFilter};
use reseller_ledger::profile::Role;
use reseller_ledger::OperationContext;

mod common;

fn acting(user_id: Uuid) -> OperationContext {
    OperationContext::new()
        .with_request_user(user_id)
        .with_permissions(vec!["admin".to_string()])
}

async fn create(env: &common::TestEnv, creator: Uuid, role: Role) -> Uuid {
    let id = Uuid::new_v4();
    let tag = id.simple().to_string();
    let command = CreateProfileCommand::new(id, format!("p_{}", tag), format!("p_{}@example.test", tag))
        .with_role(role);
    assert_ok!(ProfileHandler::new(env.pool.clone()).create(command, &acting(creator)).await);
    id
}

#[tokio::test]
async fn test_concurrent_top_ups_all_land() {
    let Some(env) = common::setup().await else { return };
    let user = create(&env, env.admin_id, Role::User).await;

    let handler = Arc::new(TopUpHandler::new(env.pool.clone()));
    let context = Arc::new(acting(env.admin_id));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let handler = Arc::clone(&handler);
        let context = Arc::clone(&context);
        tasks.push(tokio::spawn(async move {
            handler
                .execute(TopUpCommand::new(user, "10".to_string()), None, &context)
                .await
        }));
    }
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }

    let query = BalanceQueryHandler::new(env.pool.clone());
    let balance = assert_ok!(query.get_balance(user, &context).await);
    assert_eq!(balance.current_balance, dec!(200));

    let filter = TransactionFilter {
        limit: Some(200),
        ..Default::default()
    };
    let rows = assert_ok!(query.get_transactions(user, &filter, &context).await);
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|r| r.transaction_type == TransactionType::TopUp));
}

#[tokio::test]
async fn test_repayment_settles_oldest_allocation_first() {
    let Some(env) = common::setup().await else { return };
    let admin = env.admin_id;
    let reseller = create(&env, admin, Role::Reseller).await;
    let user = create(&env, reseller, Role::User).await;
    let as_reseller = acting(reseller);

    assert_ok!(
        TopUpHandler::new(env.pool.clone())
            .execute(TopUpCommand::new(reseller, "1000".to_string()), None, &acting(admin))
            .await
    );

    let allocations = AllocateCreditHandler::new(env.pool.clone());
    for _ in 0..2 {
        assert_ok!(
            allocations
                .execute(
                    AllocateCreditCommand::new(reseller, user, "100".to_string()),
                    None,
                    &as_reseller,
                )
                .await
        );
    }

    let spend = SpendHandler::new(env.pool.clone());
    assert_ok!(
        spend
            .debit(DebitCommand::new(user, "150".to_string()), None, &as_reseller)
            .await
    );

    let result = assert_ok!(
        TopUpHandler::new(env.pool.clone())
            .execute(TopUpCommand::new(user, "200".to_string()), None, &as_reseller)
            .await
    );
    assert_eq!(result.repaid, dec!(150));
    assert_eq!(result.repayments.len(), 2);
    assert_eq!(result.balance.current_balance, dec!(50));
    assert_eq!(result.balance.credit_limit, dec!(50));
    assert_eq!(result.balance.debt, Decimal::ZERO);

    let query = BalanceQueryHandler::new(env.pool.clone());
    let mut granted = assert_ok!(
        query
            .list_allocations(reseller, AllocationDirection::Granted, &as_reseller)
            .await
    );
    granted.sort_by_key(|a| a.created_at);
    assert_eq!(granted[0].outstanding, Decimal::ZERO);
    assert_eq!(granted[0].status, AllocationStatus::Repaid);
    assert_eq!(granted[1].outstanding, dec!(50));
    assert_eq!(granted[1].status, AllocationStatus::Active);

    let reseller_balance = assert_ok!(query.get_balance(reseller, &as_reseller).await);
    assert_eq!(reseller_balance.locked_amount, dec!(50));
    assert_eq!(reseller_balance.available_balance, dec!(950));

    // Still lending, so it cannot be deactivated
    assert_err!(
        ProfileHandler::new(env.pool.clone())
            .deactivate(reseller, &acting(admin))
            .await
    );
}

#[tokio::test]
async fn test_only_the_creator_allocates() {
    let Some(env) = common::setup().await else { return };
    let admin = env.admin_id;
    let reseller = create(&env, admin, Role::Reseller).await;
    let other = create(&env, admin, Role::Reseller).await;
    let user = create(&env, reseller, Role::User).await;

    assert_ok!(
        TopUpHandler::new(env.pool.clone())
            .execute(TopUpCommand::new(other, "500".to_string()), None, &acting(admin))
            .await
    );

    let result = AllocateCreditHandler::new(env.pool.clone())
        .execute(
            AllocateCreditCommand::new(other, user, "10".to_string()),
            None,
            &acting(other),
        )
        .await;
    let err = assert_err!(result);
    assert_eq!(err.error_code(), "not_creator");
}

#[tokio::test]
async fn test_deactivation_racing_allocation_stays_consistent() {
    let Some(env) = common::setup().await else { return };
    let admin = env.admin_id;
    let reseller = create(&env, admin, Role::Reseller).await;
    assert_ok!(
        TopUpHandler::new(env.pool.clone())
            .execute(TopUpCommand::new(reseller, "1000".to_string()), None, &acting(admin))
            .await
    );

    let mut users = Vec::new();
    for _ in 0..8 {
        users.push(create(&env, reseller, Role::User).await);
    }

    let mut tasks = Vec::new();
    for user in users.iter().copied() {
        let allocations = AllocateCreditHandler::new(env.pool.clone());
        let profiles = ProfileHandler::new(env.pool.clone());
        tasks.push(tokio::spawn(async move {
            let context = acting(reseller);
            tokio::join!(
                async {
                    allocations
                        .execute(
                            AllocateCreditCommand::new(reseller, user, "10".to_string()),
                            None,
                            &context,
                        )
                        .await
                        .map(|_| ())
                },
                profiles.deactivate(user, &context),
            )
        }));
    }

    let query = BalanceQueryHandler::new(env.pool.clone());
    let mut allocated: i64 = 0;
    for (user, task) in users.iter().copied().zip(tasks) {
        let (allocation, deactivation) = task.await.unwrap();
        for result in [&allocation, &deactivation] {
            if let Err(e) = result {
                assert_ne!(e.error_code(), "database_error", "{}", e);
            }
        }
        // Exactly one side wins
        assert!(allocation.is_ok() != deactivation.is_ok());

        let balance = assert_ok!(query.get_balance(user, &acting(admin)).await);
        if allocation.is_ok() {
            allocated += 1;
            assert_eq!(balance.credit_limit, dec!(10));
        } else {
            assert_eq!(balance.credit_limit, Decimal::ZERO);
        }
    }

    let reseller_balance = assert_ok!(query.get_balance(reseller, &acting(reseller)).await);
    assert_eq!(reseller_balance.locked_amount, Decimal::from(allocated * 10));
}

#[tokio::test]
async fn test_top_ups_racing_allocations_keep_credit_in_step() {
    let Some(env) = common::setup().await else { return };
    let admin = env.admin_id;
    let reseller = create(&env, admin, Role::Reseller).await;
    let user = create(&env, reseller, Role::User).await;
    let as_reseller = acting(reseller);

    assert_ok!(
        TopUpHandler::new(env.pool.clone())
            .execute(TopUpCommand::new(reseller, "5000".to_string()), None, &acting(admin))
            .await
    );
    assert_ok!(
        AllocateCreditHandler::new(env.pool.clone())
            .execute(
                AllocateCreditCommand::new(reseller, user, "100".to_string()),
                None,
                &as_reseller,
            )
            .await
    );
    assert_ok!(
        SpendHandler::new(env.pool.clone())
            .debit(DebitCommand::new(user, "100".to_string()), None, &as_reseller)
            .await
    );

    let allocations = Arc::new(AllocateCreditHandler::new(env.pool.clone()));
    let top_ups = Arc::new(TopUpHandler::new(env.pool.clone()));
    let context = Arc::new(as_reseller.clone());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let allocations = Arc::clone(&allocations);
        let alloc_context = Arc::clone(&context);
        tasks.push(tokio::spawn(async move {
            allocations
                .execute(
                    AllocateCreditCommand::new(reseller, user, "10".to_string()),
                    None,
                    &alloc_context,
                )
                .await
                .map(|_| ())
        }));

        let top_ups = Arc::clone(&top_ups);
        let top_up_context = Arc::clone(&context);
        tasks.push(tokio::spawn(async move {
            top_ups
                .execute(TopUpCommand::new(user, "15".to_string()), None, &top_up_context)
                .await
                .map(|_| ())
        }));
    }
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }

    let query = BalanceQueryHandler::new(env.pool.clone());
    let received = assert_ok!(
        query
            .list_allocations(user, AllocationDirection::Received, &as_reseller)
            .await
    );
    let outstanding: Decimal = received.iter().map(|a| a.outstanding).sum();

    let user_balance = assert_ok!(query.get_balance(user, &as_reseller).await);
    let reseller_balance = assert_ok!(query.get_balance(reseller, &as_reseller).await);
    assert_eq!(user_balance.credit_limit, outstanding);
    assert_eq!(reseller_balance.locked_amount, outstanding);
    assert_eq!(user_balance.current_balance, dec!(50));
}
