//! API Middleware
//!
//! Authentication, rate limiting and request logging.

use std::net::IpAddr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;

use super::AppState;

/// API key that authenticated the request
#[derive(Debug, Clone)]
pub struct AuthenticatedApiKey {
    pub id: Uuid,
    pub name: String,
}

fn unauthorized(error: &str, error_code: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": error,
            "error_code": error_code
        })),
    )
        .into_response()
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

/// First address of `X-Forwarded-For`, else `X-Real-IP`
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    header_ip(headers, "X-Forwarded-For").or_else(|| header_ip(headers, "X-Real-IP"))
}

// =========================================================================
// API Key Authentication
// =========================================================================

/// Validate `X-API-Key` and build the `OperationContext` for the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let api_key = match headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        Some(key) => key,
        None => return Err(unauthorized("Missing X-API-Key header", "missing_api_key")),
    };

    let api_key_record: Option<(Uuid, String, Vec<String>, bool)> = sqlx::query_as(
        r#"
        SELECT id, name, permissions, is_active
        FROM api_keys
        WHERE key_hash = encode(sha256($1::bytea), 'hex')
        "#,
    )
    .bind(api_key.as_bytes())
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| AppError::Database(e).into_response())?;

    let (api_key_id, name, permissions, is_active) = match api_key_record {
        Some(record) => record,
        None => return Err(AppError::InvalidApiKey.into_response()),
    };

    if !is_active {
        return Err(unauthorized("API key is disabled", "api_key_disabled"));
    }

    let correlation_id = headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new()
        .with_api_key(api_key_id)
        .with_correlation_id(correlation_id)
        .with_permissions(permissions);

    // Ledger endpoints require it; they report the missing header themselves
    if let Some(raw) = headers.get("X-Request-User-Id").and_then(|v| v.to_str().ok()) {
        let user_id = Uuid::parse_str(raw).map_err(|_| {
            AppError::InvalidRequest("Invalid X-Request-User-Id header format".to_string())
                .into_response()
        })?;
        context = context.with_request_user(user_id);
    }

    if let Some(ip) = client_ip(&headers) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(AuthenticatedApiKey {
        id: api_key_id,
        name,
    });
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

// =========================================================================
// Rate Limiting
// =========================================================================

/// Fixed one-minute window per API key, counted in `rate_limit_buckets`
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let api_key = request
        .extensions()
        .get::<AuthenticatedApiKey>()
        .cloned()
        .ok_or_else(|| {
            AppError::Internal("Auth middleware must run first".to_string()).into_response()
        })?;

    let count: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limit_buckets (api_key_id, window_start, request_count)
        VALUES ($1, date_trunc('minute', NOW()), 1)
        ON CONFLICT (api_key_id, window_start)
        DO UPDATE SET request_count = rate_limit_buckets.request_count + 1
        RETURNING request_count
        "#,
    )
    .bind(api_key.id)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| AppError::Database(e).into_response())?;

    if count > state.rate_limit_per_minute {
        tracing::warn!(
            api_key = %api_key.name,
            count = count,
            limit = state.rate_limit_per_minute,
            "Rate limit exceeded"
        );
        return Err(AppError::RateLimitExceeded.into_response());
    }

    Ok(next.run(request).await)
}

// =========================================================================
// Request Logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
