//! Load Testing Tool
//!
//! Fires concurrent top-ups at a handful of balances and checks that the
//! stored balances add up afterwards.
//!
//! Run with: cargo run --bin load_test --release -- --requests 1000 --users 5

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use reseller_ledger::handlers::{TopUpCommand, TopUpHandler};
use reseller_ledger::profile::{NewProfile, ProfileRepository, Role};
use reseller_ledger::OperationContext;

fn arg(args: &[String], name: &str, default: usize) -> usize {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let request_count = arg(&args, "--requests", 1000);
    let user_count = arg(&args, "--users", 5).max(1);

    let database_url = std::env::var("DATABASE_URL")?;

    println!("Load Test - {} top-ups across {} balances", request_count, user_count);
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await?;

    // Fresh admin and users so runs do not interfere
    let run = Uuid::new_v4().simple().to_string();
    let admin_id = Uuid::new_v4();
    let mut user_ids = Vec::with_capacity(user_count);

    let mut tx = pool.begin().await?;
    ProfileRepository::insert(
        &mut tx,
        &NewProfile {
            id: admin_id,
            username: format!("load-admin-{}", run),
            email: format!("load-admin-{}@example.test", run),
            display_name: None,
            role: Role::Admin,
            created_by: None,
        },
    )
    .await?;
    for n in 0..user_count {
        let id = Uuid::new_v4();
        ProfileRepository::insert(
            &mut tx,
            &NewProfile {
                id,
                username: format!("load-user-{}-{}", run, n),
                email: format!("load-user-{}-{}@example.test", run, n),
                display_name: None,
                role: Role::User,
                created_by: Some(admin_id),
            },
        )
        .await?;
        user_ids.push(id);
    }
    tx.commit().await?;

    let context = Arc::new(
        OperationContext::new()
            .with_request_user(admin_id)
            .with_permissions(vec!["admin".to_string()]),
    );
    let handler = Arc::new(TopUpHandler::new(pool.clone()));

    // Amounts in cents, drawn up front
    let mut rng = rand::thread_rng();
    let jobs: Vec<(Uuid, Decimal)> = (0..request_count)
        .map(|_| {
            let user_id = user_ids[rng.gen_range(0..user_ids.len())];
            (user_id, Decimal::new(rng.gen_range(1..=100_000), 2))
        })
        .collect();

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(jobs.len());
    for (user_id, amount) in jobs {
        let handler = Arc::clone(&handler);
        let context = Arc::clone(&context);
        tasks.push(tokio::spawn(async move {
            let command = TopUpCommand::new(user_id, amount.to_string());
            handler.execute(command, None, &context).await.map(|_| amount)
        }));
    }

    let mut success_count = 0u64;
    let mut expected_total = Decimal::ZERO;
    for task in tasks {
        match task.await? {
            Ok(amount) => {
                success_count += 1;
                expected_total += amount;
            }
            Err(e) => eprintln!("top-up failed: {}", e),
        }
    }
    let elapsed = start.elapsed();

    let stored_total: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(current_balance), 0) FROM user_balances WHERE user_id = ANY($1)",
    )
    .bind(&user_ids)
    .fetch_one(&pool)
    .await?;

    println!("\n=== Load Test Results ===");
    println!("Total requests: {}", request_count);
    println!("Successful: {}", success_count);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Rate: {:.0} top-ups/sec", success_count as f64 / elapsed.as_secs_f64());
    println!("Expected total: {}", expected_total);
    println!("Stored total:   {}", stored_total);

    if stored_total != expected_total {
        anyhow::bail!("balance drift: stored {} != expected {}", stored_total, expected_total);
    }

    Ok(())
}
