//! Profile Handler
//!
//! Creating, reading, updating and deactivating profiles. A new profile is
//! owned by the acting user and gets an empty balance in the same
//! transaction.

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder, AuditLogService};
use crate::domain::{DomainError, OperationContext};
use crate::error::AppError;
use crate::ledger::LedgerRepository;
use crate::profile::{NewProfile, Profile, ProfilePatch, ProfileRepository};

use super::access::{acting_user, ensure_can_create, ensure_can_manage, ensure_can_view};
use super::{with_retry, CreateProfileCommand};

pub struct ProfileHandler {
    profiles: ProfileRepository,
    ledger: LedgerRepository,
}

impl ProfileHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            profiles: ProfileRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool),
        }
    }

    pub async fn create(
        &self,
        command: CreateProfileCommand,
        context: &OperationContext,
    ) -> Result<Profile, AppError> {
        if command.username.trim().is_empty() || !command.email.contains('@') {
            return Err(AppError::InvalidRequest(
                "username and a valid email are required".to_string(),
            ));
        }

        let actor = self.profiles.get_active(acting_user(context)?).await?;
        ensure_can_create(&actor, command.role)?;

        let mut tx = self.ledger.begin().await?;
        let profile = ProfileRepository::insert(
            &mut tx,
            &NewProfile {
                id: command.user_id,
                username: command.username,
                email: command.email,
                display_name: command.display_name,
                role: command.role,
                created_by: Some(actor.id),
            },
        )
        .await?;

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::ProfileCreated)
                .resource_type("Profile")
                .resource_id(profile.id)
                .after_state(&profile),
            context,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %profile.id,
            role = %profile.role,
            created_by = %actor.id,
            "Profile created"
        );

        Ok(profile)
    }

    pub async fn get(&self, user_id: Uuid, context: &OperationContext) -> Result<Profile, AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self
            .profiles
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;
        ensure_can_view(&actor, &target)?;
        Ok(target)
    }

    /// Admins see every profile; everyone else the profiles they created
    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
        context: &OperationContext,
    ) -> Result<Vec<Profile>, AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let created_by = if actor.is_admin() { None } else { Some(actor.id) };
        self.profiles
            .list(created_by, limit.clamp(1, 200), offset.max(0))
            .await
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        patch: ProfilePatch,
        context: &OperationContext,
    ) -> Result<Profile, AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let before = self.profiles.get_active(user_id).await?;
        if actor.id != before.id {
            ensure_can_manage(&actor, &before)?;
        }

        if patch.is_empty() {
            return Ok(before);
        }

        let mut tx = self.ledger.begin().await?;
        let after = ProfileRepository::update(&mut tx, user_id, &patch).await?;

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::ProfileUpdated)
                .resource_type("Profile")
                .resource_id(user_id)
                .before_state(&before)
                .after_state(&after)
                .changed_fields(patch.changed_fields()),
            context,
        )
        .await?;

        tx.commit().await?;
        Ok(after)
    }

    /// Soft delete. Refused while the profile still lends or owes credit.
    pub async fn deactivate(
        &self,
        user_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let actor = self.profiles.get_active(acting_user(context)?).await?;
        let target = self.profiles.get_active(user_id).await?;
        ensure_can_manage(&actor, &target)?;

        with_retry("deactivate_profile", || self.try_deactivate(user_id, context)).await?;

        tracing::info!(user_id = %user_id, "Profile deactivated");
        Ok(())
    }

    async fn try_deactivate(
        &self,
        user_id: Uuid,
        context: &OperationContext,
    ) -> Result<(), AppError> {
        let mut tx = self.ledger.begin().await?;

        // Profile row before balance row, as allocation does
        let before = ProfileRepository::lock_active(&mut tx, user_id).await?;
        let book = LedgerRepository::lock_balances(&mut tx, &[user_id]).await?;
        let balance = book.balance(user_id)?;
        if !balance.locked_amount().is_zero() || !balance.credit_limit().is_zero() {
            return Err(DomainError::BusinessRuleViolation(
                "Profile has outstanding credit allocations".to_string(),
            )
            .into());
        }

        let deactivated = ProfileRepository::deactivate(&mut tx, user_id).await?;

        AuditLogService::log_in(
            &mut tx,
            AuditLogBuilder::new(AuditAction::ProfileDeactivated)
                .resource_type("Profile")
                .resource_id(user_id)
                .before_state(&before)
                .after_state(&deactivated)
                .changed_fields(vec!["is_active".to_string()]),
            context,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
