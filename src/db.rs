//! Database module
//!
//! Connection checks and schema verification. The schema itself lives in
//! `migrations/` and is applied with `sqlx::migrate!`.

use sqlx::PgPool;

/// Tables the service cannot run without
pub const REQUIRED_TABLES: &[&str] = &[
    "profiles",
    "api_keys",
    "rate_limit_buckets",
    "user_balances",
    "transactions",
    "credit_allocations",
    "idempotency_keys",
    "audit_logs",
];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let present: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = 'public' AND table_name = ANY($1)
        "#,
    )
    .bind(REQUIRED_TABLES)
    .fetch_all(pool)
    .await?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !present.iter().any(|p| p == table))
        .collect();

    if !missing.is_empty() {
        tracing::error!(missing = ?missing, "Required tables do not exist");
        return Ok(false);
    }

    // Balances need a profile to hang off; an empty table means no seed yet
    let admins: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE role = 'admin' AND is_active")
            .fetch_one(pool)
            .await?;
    if admins == 0 {
        tracing::warn!("No active admin profile. Seed one before creating resellers.");
    }

    Ok(true)
}
