//! Common test utilities
//!
//! Every test gets its own API key and admin profile, so tests can share
//! one database and run in parallel. Tests are skipped when `DATABASE_URL`
//! is not set.

#![allow(dead_code)]

use std::str::FromStr;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::util::ServiceExt;
use uuid::Uuid;

use reseller_ledger::api::{create_app, AppState};
use reseller_ledger::profile::{NewProfile, ProfileRepository, Role};

pub struct TestEnv {
    pub pool: PgPool,
    pub app: Router,
    pub api_key: String,
    pub admin_id: Uuid,
}

/// Connect, migrate and seed an admin profile plus an API key with the
/// given permissions.
pub async fn setup_with_permissions(permissions: &[&str]) -> Option<TestEnv> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let tag = Uuid::new_v4().simple().to_string();
    let api_key = format!("test_key_{}", tag);
    let key_hash = hex::encode(Sha256::digest(api_key.as_bytes()));
    let admin_id = Uuid::new_v4();

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    sqlx::query(
        r#"
        INSERT INTO api_keys (id, name, key_hash, key_prefix, permissions, is_active)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind("Test Key")
    .bind(&key_hash)
    .bind(&api_key[..17])
    .bind(permissions.iter().map(|p| p.to_string()).collect::<Vec<_>>())
    .execute(&mut *tx)
    .await
    .expect("Failed to seed API key");

    ProfileRepository::insert(
        &mut tx,
        &NewProfile {
            id: admin_id,
            username: format!("admin_{}", tag),
            email: format!("admin_{}@example.test", tag),
            display_name: Some("Test Admin".to_string()),
            role: Role::Admin,
            created_by: None,
        },
    )
    .await
    .expect("Failed to seed admin profile");

    tx.commit().await.expect("Failed to commit seed");

    let app = create_app(AppState::new(pool.clone()));

    Some(TestEnv {
        pool,
        app,
        api_key,
        admin_id,
    })
}

pub async fn setup() -> Option<TestEnv> {
    setup_with_permissions(&["admin"]).await
}

impl TestEnv {
    /// Send one request as `actor` and decode the JSON body
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        actor: Uuid,
        body: Option<Value>,
        idempotency_key: Option<Uuid>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-Key", &self.api_key)
            .header("X-Request-User-Id", actor.to_string());
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key.to_string());
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create a profile owned by `creator`
    pub async fn create_profile(&self, creator: Uuid, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        let tag = id.simple().to_string();
        let (status, body) = self
            .call(
                "POST",
                "/api/v1/users",
                creator,
                Some(serde_json::json!({
                    "user_id": id,
                    "username": format!("{}_{}", role, tag),
                    "email": format!("{}_{}@example.test", role, tag),
                    "role": role,
                })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "profile creation failed: {}", body);
        id
    }

    pub async fn balance(&self, actor: Uuid, user_id: Uuid) -> Value {
        let (status, body) = self
            .call("GET", &format!("/api/v1/users/{}/balance", user_id), actor, None, None)
            .await;
        assert_eq!(status, StatusCode::OK, "balance lookup failed: {}", body);
        body
    }
}

/// Decimal field of a JSON body, whatever its scale
pub fn dec_field(value: &Value, field: &str) -> Decimal {
    let raw = value[field]
        .as_str()
        .unwrap_or_else(|| panic!("{} missing in {}", field, value));
    Decimal::from_str(raw).unwrap()
}
