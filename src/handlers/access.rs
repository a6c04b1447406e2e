//! Authorization rules
//!
//! Who may read or move which balance. Pure checks over the acting profile,
//! the target profile and the API key permissions in the context.

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::profile::{Profile, Role};

pub const PERMISSION_TOP_UP: &str = "top_up";
pub const PERMISSION_DEBIT: &str = "debit";
pub const PERMISSION_ADJUST: &str = "adjust";

/// Acting profile id from the context
pub fn acting_user(context: &OperationContext) -> Result<uuid::Uuid, AppError> {
    context
        .request_user_id
        .ok_or_else(|| AppError::MissingHeader("X-Request-User-Id".to_string()))
}

fn require_permission(context: &OperationContext, permission: &str) -> Result<(), AppError> {
    if context.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied)
    }
}

/// Self, the creator, or an admin
pub fn can_view(actor: &Profile, target: &Profile) -> bool {
    actor.id == target.id || actor.is_admin() || target.is_created_by(actor.id)
}

/// An admin, or the creator of the target
pub fn can_manage(actor: &Profile, target: &Profile) -> bool {
    actor.is_admin() || target.is_created_by(actor.id)
}

pub fn ensure_can_view(actor: &Profile, target: &Profile) -> Result<(), AppError> {
    if can_view(actor, target) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} may not view {}",
            actor.id, target.id
        )))
    }
}

pub fn ensure_can_manage(actor: &Profile, target: &Profile) -> Result<(), AppError> {
    if can_manage(actor, target) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} does not manage {}",
            actor.id, target.id
        )))
    }
}

/// `top_up` permission; admin or creator
pub fn ensure_can_top_up(
    context: &OperationContext,
    actor: &Profile,
    target: &Profile,
) -> Result<(), AppError> {
    require_permission(context, PERMISSION_TOP_UP)?;
    ensure_can_manage(actor, target)
}

/// Refunds follow the top-up rule
pub fn ensure_can_refund(
    context: &OperationContext,
    actor: &Profile,
    target: &Profile,
) -> Result<(), AppError> {
    ensure_can_top_up(context, actor, target)
}

/// `debit` permission; the key is trusted to charge any visible balance
pub fn ensure_can_debit(
    context: &OperationContext,
    actor: &Profile,
    target: &Profile,
) -> Result<(), AppError> {
    require_permission(context, PERMISSION_DEBIT)?;
    ensure_can_view(actor, target)
}

/// `adjust` permission and an admin profile
pub fn ensure_can_adjust(context: &OperationContext, actor: &Profile) -> Result<(), AppError> {
    require_permission(context, PERMISSION_ADJUST)?;
    if !actor.is_admin() {
        return Err(AppError::Forbidden(
            "Balance adjustments require an admin profile".to_string(),
        ));
    }
    Ok(())
}

/// Only the allocator itself may allocate its credit
pub fn ensure_can_allocate(actor: &Profile, from: &Profile) -> Result<(), AppError> {
    if actor.id != from.id {
        return Err(AppError::Forbidden(
            "Credit can only be allocated by its owner".to_string(),
        ));
    }
    if actor.role == Role::User {
        return Err(AppError::Forbidden(
            "Only admins and resellers allocate credit".to_string(),
        ));
    }
    Ok(())
}

/// Admins create any role; resellers create users
pub fn ensure_can_create(actor: &Profile, role: Role) -> Result<(), AppError> {
    if actor.role.can_create(role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "A {} may not create a {}",
            actor.role, role
        )))
    }
}
