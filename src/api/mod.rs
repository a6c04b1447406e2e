//! API module
//!
//! HTTP API endpoints, the balance-operations dispatcher and middleware.

pub mod middleware;
pub mod operations;
pub mod routes;

use axum::extract::FromRef;
use axum::{middleware as axum_middleware, routing::get, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::idempotency::DEFAULT_TTL_HOURS;

pub use routes::create_router;

/// Shared state for every request
#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Requests per minute per API key
    pub rate_limit_per_minute: i32,
    pub idempotency_ttl_hours: i64,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            rate_limit_per_minute: 100,
            idempotency_ttl_hours: DEFAULT_TTL_HOURS,
        }
    }

    pub fn from_config(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            rate_limit_per_minute: config.rate_limit_per_minute,
            idempotency_ttl_hours: config.idempotency_ttl_hours,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Full application: `/health` plus the authenticated `/api/v1` tree
pub fn create_app(state: AppState) -> Router {
    // Layers run last-added first: logging -> auth -> rate_limit -> handler
    let protected_routes = create_router()
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
