//! Profile Repository

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;

use super::{Profile, Role};

const PROFILE_COLUMNS: &str =
    "id, username, email, display_name, role, created_by, is_active, created_at, updated_at";

/// Values for a new profile row
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub created_by: Option<Uuid>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.display_name.is_none()
    }

    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.email.is_some() {
            fields.push("email".to_string());
        }
        if self.display_name.is_some() {
            fields.push("display_name".to_string());
        }
        fields
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Profile>, AppError> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Active profile or `UserNotFound`
    pub async fn get_active(&self, id: Uuid) -> Result<Profile, AppError> {
        self.find(id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Active profile read inside a ledger transaction
    pub async fn get_active_in(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Profile, AppError> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE id = $1 AND is_active = TRUE FOR SHARE",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        profile.ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Active profile locked against concurrent updates. Lock it before its
    /// balance row. Foreign-key readers are not blocked.
    pub async fn lock_active(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Profile, AppError> {
        let profile = sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE id = $1 AND is_active = TRUE FOR NO KEY UPDATE",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        profile.ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Active profiles, optionally only those created by `created_by`
    pub async fn list(
        &self,
        created_by: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Profile>, AppError> {
        let profiles = sqlx::query_as::<_, Profile>(&format!(
            r#"
            SELECT {} FROM profiles
            WHERE is_active = TRUE AND ($1::uuid IS NULL OR created_by = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            PROFILE_COLUMNS
        ))
        .bind(created_by)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    /// Insert the profile and its empty balance row
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        profile: &NewProfile,
    ) -> Result<Profile, AppError> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM profiles WHERE id = $1 OR username = $2 OR email = $3",
        )
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.email)
        .fetch_optional(&mut **tx)
        .await?;

        if existing.is_some() {
            return Err(AppError::InvalidRequest(
                "Profile with this ID, username, or email already exists".to_string(),
            ));
        }

        let created = sqlx::query_as::<_, Profile>(&format!(
            r#"
            INSERT INTO profiles (id, username, email, display_name, role, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(profile.id)
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(profile.role)
        .bind(profile.created_by)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO user_balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(profile.id)
            .execute(&mut **tx)
            .await?;

        Ok(created)
    }

    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Profile, AppError> {
        if let Some(email) = &patch.email {
            let taken: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM profiles WHERE email = $1 AND id <> $2")
                    .bind(email)
                    .bind(id)
                    .fetch_optional(&mut **tx)
                    .await?;
            if taken.is_some() {
                return Err(AppError::InvalidRequest("Email already in use".to_string()));
            }
        }

        let updated = sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET email = COALESCE($2, email),
                display_name = COALESCE($3, display_name),
                updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(&patch.email)
        .bind(&patch.display_name)
        .fetch_optional(&mut **tx)
        .await?;

        updated.ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Soft delete; the ledger history stays
    pub async fn deactivate(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Profile, AppError> {
        let deactivated = sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        deactivated.ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_changed_fields() {
        let patch = ProfilePatch {
            email: None,
            display_name: Some("Acme SMS".to_string()),
        };
        assert!(!patch.is_empty());
        assert_eq!(patch.changed_fields(), vec!["display_name".to_string()]);
        assert!(ProfilePatch::default().is_empty());
    }
}
