//! PostgreSQL store for federation-service.
//!
//! Uses sqlx with runtime-checked queries.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::QueryBuilder;
use uuid::Uuid;

use super::store::{
    like_pattern, CredentialStore, OrganisationStore, RecipientRow, RecipientStore, StoreHealth,
    UserStore,
};
use super::FederationError;
use crate::models::settings::PatchValue;
use crate::models::{LocalOrganisationSettings, LocalUser, ProviderCredential, SettingsPatch};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StoreHealth for Database {
    /// Ping the database.
    async fn health_check(&self) -> Result<(), FederationError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                FederationError::Database(e)
            })?;
        Ok(())
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ==================== Credentials ====================

#[async_trait]
impl CredentialStore for Database {
    async fn find_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<Option<ProviderCredential>, FederationError> {
        let credential = sqlx::query_as::<_, ProviderCredential>(
            r#"
            SELECT user_id, provider_kind, access_token, refresh_token, expires_at, updated_utc
            FROM provider_credentials
            WHERE user_id = $1 AND provider_kind = $2
            "#,
        )
        .bind(user_id)
        .bind(provider_kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn upsert_credential(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), FederationError> {
        sqlx::query(
            r#"
            INSERT INTO provider_credentials
                (user_id, provider_kind, access_token, refresh_token, expires_at, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, provider_kind) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(credential.user_id)
        .bind(&credential.provider_kind)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(credential.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<bool, FederationError> {
        let result = sqlx::query(
            "DELETE FROM provider_credentials WHERE user_id = $1 AND provider_kind = $2",
        )
        .bind(user_id)
        .bind(provider_kind)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for Database {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>, FederationError> {
        let user = sqlx::query_as::<_, LocalUser>(
            "SELECT user_id, email, name, created_utc FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &LocalUser) -> Result<(), FederationError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, name, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ==================== Organisations ====================

#[async_trait]
impl OrganisationStore for Database {
    async fn find_organisation_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, FederationError> {
        let org_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT org_id FROM organisation_members
            WHERE user_id = $1
            ORDER BY created_utc ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org_id)
    }

    async fn find_settings(
        &self,
        org_id: Uuid,
    ) -> Result<Option<LocalOrganisationSettings>, FederationError> {
        let settings = sqlx::query_as::<_, LocalOrganisationSettings>(
            "SELECT * FROM organisation_settings WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings)
    }

    async fn apply_settings_patch(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError> {
        let columns = patch.columns();
        if columns.is_empty() {
            return Ok(());
        }

        let mut builder = settings_upsert(org_id, &columns);
        for (column, _) in &columns {
            builder.push(format!(", {column} = EXCLUDED.{column}"));
        }

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn fill_unset_settings(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError> {
        let columns = patch.columns();
        if columns.is_empty() {
            return Ok(());
        }

        // Every SET expression sees the row as it is at write time, so an
        // administrator edit committed after the pull read is kept.
        let mut builder = settings_upsert(org_id, &columns);
        for (column, _) in &columns {
            builder.push(format!(", {column} = {}", fill_expression(column)));
        }

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

const SIGNATURE_COLUMNS: [&str; 3] = [
    "typed_signature_enabled",
    "upload_signature_enabled",
    "draw_signature_enabled",
];

/// `INSERT ... ON CONFLICT (org_id) DO UPDATE SET updated_utc = NOW()`, ready
/// for further assignments. A single statement keeps the write atomic.
fn settings_upsert(
    org_id: Uuid,
    columns: &[(&'static str, PatchValue)],
) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO organisation_settings (org_id");
    for (column, _) in columns {
        builder.push(", ").push(*column);
    }
    builder.push(") VALUES (").push_bind(org_id);
    for (_, value) in columns {
        builder.push(", ");
        match value {
            PatchValue::Text(text) => builder.push_bind(text.clone()),
            PatchValue::Flag(flag) => builder.push_bind(*flag),
        };
    }
    builder.push(") ON CONFLICT (org_id) DO UPDATE SET updated_utc = NOW()");
    builder
}

/// Right-hand side of a fill-only assignment for `column`.
fn fill_expression(column: &str) -> String {
    match column {
        "branding_logo" | "branding_logo_derived" => format!(
            "CASE WHEN organisation_settings.branding_logo IS NULL \
             OR organisation_settings.branding_logo_derived \
             THEN EXCLUDED.{column} ELSE organisation_settings.{column} END"
        ),
        c if SIGNATURE_COLUMNS.contains(&c) => {
            let any_enabled = SIGNATURE_COLUMNS
                .iter()
                .map(|s| format!("COALESCE(organisation_settings.{s}, EXCLUDED.{s}, TRUE)"))
                .collect::<Vec<_>>()
                .join(" OR ");
            format!(
                "CASE WHEN {any_enabled} \
                 THEN COALESCE(organisation_settings.{column}, EXCLUDED.{column}) \
                 ELSE organisation_settings.{column} END"
            )
        }
        _ => format!("COALESCE(organisation_settings.{column}, EXCLUDED.{column})"),
    }
}

// ==================== Recipients ====================

#[async_trait]
impl RecipientStore for Database {
    async fn search_recent_recipients(
        &self,
        user_id: Uuid,
        team_id: Option<Uuid>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            SELECT name, email FROM (
                SELECT DISTINCT ON (LOWER(r.email)) r.name, r.email, d.created_utc
                FROM recipients r
                JOIN documents d ON d.document_id = r.document_id
                WHERE (
                        ($1::uuid IS NOT NULL AND d.team_id = $1)
                        OR ($1::uuid IS NULL AND d.owner_id = $2 AND d.team_id IS NULL)
                      )
                  AND (r.email ILIKE $3 OR r.name ILIKE $3)
                ORDER BY LOWER(r.email), d.created_utc DESC
            ) latest
            ORDER BY created_utc DESC
            LIMIT $4
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .bind(like_pattern(query))
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn search_team_members(
        &self,
        team_id: Uuid,
        exclude_user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            SELECT u.name, u.email
            FROM team_members tm
            JOIN users u ON u.user_id = tm.user_id
            WHERE tm.team_id = $1
              AND tm.user_id <> $2
              AND (u.email ILIKE $3 OR u.name ILIKE $3)
            ORDER BY u.name NULLS LAST, u.email
            LIMIT $4
            "#,
        )
        .bind(team_id)
        .bind(exclude_user_id)
        .bind(like_pattern(query))
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
