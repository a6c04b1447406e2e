//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditLogService, ChainVerificationResult};
use crate::domain::{AmountInput, OperationContext, TransactionType};
use crate::error::AppError;
use crate::handlers::{
    AdjustBalanceCommand, AllocateCreditCommand, AllocateCreditHandler, AllocationResult,
    BalanceChangeResult, BalanceQueryHandler, CreateProfileCommand, DebitCommand,
    LockBalanceCommand, LockBalanceHandler, LockResult, ProfileHandler, RefundCommand,
    SpendHandler, TopUpCommand, TopUpHandler, TopUpResult,
};
use crate::jobs::{JobScheduler, MaintenanceReport};
use crate::ledger::{
    AllocationDirection, BalanceView, CreditAllocationRecord, LedgerEntry, TransactionFilter,
    DEFAULT_PAGE_SIZE,
};
use crate::profile::{Profile, ProfilePatch, Role};

use super::operations::{self, BalanceOperationRequest};
use super::AppState;

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default, rename = "type")]
    pub transaction_type: Option<TransactionType>,
}

/// Body of top-up, debit and refund
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: AmountInput,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub amount: AmountInput,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockRequest {
    #[serde(default)]
    pub locked: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateCreditRequest {
    pub to_user_id: Uuid,
    pub amount: AmountInput,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllocationsQuery {
    #[serde(default)]
    pub direction: AllocationDirection,
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    #[serde(default)]
    pub request_user_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// `Idempotency-Key` header; present but malformed is rejected
fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>, AppError> {
    headers
        .get("Idempotency-Key")
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .ok_or_else(|| AppError::InvalidRequest("Idempotency-Key must be a UUID".to_string()))
        })
        .transpose()
}

fn require_admin_key(context: &OperationContext) -> Result<(), AppError> {
    if context.has_permission("admin") {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin permission required".to_string()))
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/balance-operations", post(balance_operations))
        // Profiles
        .route("/users", post(create_profile).get(list_profiles))
        .route(
            "/users/:user_id",
            get(get_profile).patch(update_profile).delete(deactivate_profile),
        )
        // Balances
        .route("/users/:user_id/balance", get(get_balance))
        .route("/users/:user_id/transactions", get(get_transactions))
        .route("/users/:user_id/top-up", post(top_up))
        .route("/users/:user_id/debit", post(debit))
        .route("/users/:user_id/refund", post(refund))
        .route("/users/:user_id/lock", post(lock_balance))
        .route("/users/:user_id/adjust", post(adjust_balance))
        // Credit
        .route("/credit-allocations", post(allocate_credit))
        .route("/users/:user_id/credit-allocations", get(list_allocations))
        // Admin
        .route("/admin/audit-logs", get(get_audit_logs))
        .route("/admin/audit-logs/verify", get(verify_audit_chain))
        .route("/admin/maintenance", post(run_maintenance))
}

// =========================================================================
// POST /balance-operations
// =========================================================================

async fn balance_operations(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<BalanceOperationRequest>,
) -> Result<Json<Value>, AppError> {
    let key = idempotency_key(&headers)?;
    let response = operations::dispatch(&state, request, key, &context).await?;
    Ok(Json(response))
}

// =========================================================================
// Profiles
// =========================================================================

async fn create_profile(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    let command = CreateProfileCommand::new(request.user_id, request.username, request.email)
        .with_role(request.role);
    let command = match request.display_name {
        Some(display_name) => command.with_display_name(display_name),
        None => command,
    };

    let profile = ProfileHandler::new(state.pool).create(command, &context).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn list_profiles(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Profile>>, AppError> {
    let profiles = ProfileHandler::new(state.pool)
        .list(query.limit, query.offset, &context)
        .await?;
    Ok(Json(profiles))
}

async fn get_profile(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Profile>, AppError> {
    let profile = ProfileHandler::new(state.pool).get(user_id, &context).await?;
    Ok(Json(profile))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let patch = ProfilePatch {
        email: request.email,
        display_name: request.display_name,
    };
    let profile = ProfileHandler::new(state.pool)
        .update(user_id, patch, &context)
        .await?;
    Ok(Json(profile))
}

async fn deactivate_profile(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ProfileHandler::new(state.pool)
        .deactivate(user_id, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// Balances
// =========================================================================

async fn get_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceView>, AppError> {
    let balance = BalanceQueryHandler::new(state.pool)
        .get_balance(user_id, &context)
        .await?;
    Ok(Json(balance))
}

async fn get_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    let filter = TransactionFilter {
        limit: query.limit,
        offset: query.offset,
        transaction_type: query.transaction_type,
    };
    let entries = BalanceQueryHandler::new(state.pool)
        .get_transactions(user_id, &filter, &context)
        .await?;
    Ok(Json(entries))
}

async fn top_up(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<Json<TopUpResult>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = TopUpCommand {
        user_id,
        amount: request.amount.into_text(),
        description: request.description,
    };

    let result = TopUpHandler::new(state.pool)
        .with_idempotency_ttl(state.idempotency_ttl_hours)
        .execute(command, key, &context)
        .await?;
    Ok(Json(result))
}

async fn debit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceChangeResult>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = DebitCommand {
        user_id,
        amount: request.amount.into_text(),
        description: request.description,
    };

    let result = SpendHandler::new(state.pool)
        .with_idempotency_ttl(state.idempotency_ttl_hours)
        .debit(command, key, &context)
        .await?;
    Ok(Json(result))
}

async fn refund(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<Json<BalanceChangeResult>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = RefundCommand {
        user_id,
        amount: request.amount.into_text(),
        description: request.description,
    };

    let result = SpendHandler::new(state.pool)
        .with_idempotency_ttl(state.idempotency_ttl_hours)
        .refund(command, key, &context)
        .await?;
    Ok(Json(result))
}

async fn adjust_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<BalanceChangeResult>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = AdjustBalanceCommand::new(user_id, request.amount.into_text(), request.reason);

    let result = SpendHandler::new(state.pool)
        .with_idempotency_ttl(state.idempotency_ttl_hours)
        .adjust(command, key, &context)
        .await?;
    Ok(Json(result))
}

async fn lock_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<LockRequest>,
) -> Result<Json<LockResult>, AppError> {
    let command = LockBalanceCommand {
        user_id,
        locked: request.locked,
    };
    let result = LockBalanceHandler::new(state.pool)
        .execute(command, &context)
        .await?;
    Ok(Json(result))
}

// =========================================================================
// Credit allocations
// =========================================================================

async fn allocate_credit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(request): Json<AllocateCreditRequest>,
) -> Result<(StatusCode, Json<AllocationResult>), AppError> {
    let key = idempotency_key(&headers)?;
    let from_user_id = crate::handlers::access::acting_user(&context)?;
    let command =
        AllocateCreditCommand::new(from_user_id, request.to_user_id, request.amount.into_text());

    let result = AllocateCreditHandler::new(state.pool)
        .with_idempotency_ttl(state.idempotency_ttl_hours)
        .execute(command, key, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn list_allocations(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<AllocationsQuery>,
) -> Result<Json<Vec<CreditAllocationRecord>>, AppError> {
    let allocations = BalanceQueryHandler::new(state.pool)
        .list_allocations(user_id, query.direction, &context)
        .await?;
    Ok(Json(allocations))
}

// =========================================================================
// Admin
// =========================================================================

async fn get_audit_logs(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    require_admin_key(&context)?;
    let entries = AuditLogService::new(state.pool)
        .get_recent(query.request_user_id, query.limit.clamp(1, 1000))
        .await?;
    Ok(Json(entries))
}

async fn verify_audit_chain(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<ChainVerificationResult>, AppError> {
    require_admin_key(&context)?;
    let result = AuditLogService::new(state.pool)
        .verify_hash_chain(None)
        .await?;
    Ok(Json(result))
}

async fn run_maintenance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
) -> Result<Json<MaintenanceReport>, AppError> {
    require_admin_key(&context)?;
    let report = JobScheduler::new(state.pool).run_all_once().await;
    tracing::info!(healthy = report.is_healthy(), "Maintenance run on request");
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_profile_request_defaults_to_user_role() {
        let json = r#"{
            "user_id": "550e8400-e29b-41d4-a716-446655440000",
            "username": "alice",
            "email": "alice@example.com"
        }"#;

        let request: CreateProfileRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.username, "alice");
        assert_eq!(request.role, Role::User);
        assert!(request.display_name.is_none());
    }

    #[test]
    fn test_amount_request_accepts_string_or_number() {
        let request: AmountRequest = serde_json::from_str(r#"{"amount": "100.50"}"#).unwrap();
        assert_eq!(request.amount.into_text(), "100.50");

        let request: AmountRequest =
            serde_json::from_str(r#"{"amount": 7, "description": "promo"}"#).unwrap();
        assert_eq!(request.amount.into_text(), "7");
        assert_eq!(request.description.as_deref(), Some("promo"));
    }

    #[test]
    fn test_page_query_defaults() {
        let query: PageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
    }

    #[test]
    fn test_allocations_query_defaults_to_received() {
        let query: AllocationsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.direction, AllocationDirection::Received);

        let query: AllocationsQuery = serde_json::from_str(r#"{"direction": "granted"}"#).unwrap();
        assert_eq!(query.direction, AllocationDirection::Granted);
    }

    #[test]
    fn test_idempotency_key_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);

        let key = Uuid::new_v4();
        headers.insert("idempotency-key", key.to_string().parse().unwrap());
        assert_eq!(idempotency_key(&headers).unwrap(), Some(key));

        headers.insert("idempotency-key", "not-a-uuid".parse().unwrap());
        assert!(matches!(idempotency_key(&headers), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_admin_routes_require_admin_key() {
        let context = OperationContext::new().with_permissions(vec!["top_up".to_string()]);
        assert!(matches!(require_admin_key(&context), Err(AppError::Forbidden(_))));

        let context = OperationContext::new().with_permissions(vec!["admin".to_string()]);
        assert!(require_admin_key(&context).is_ok());
    }
}
