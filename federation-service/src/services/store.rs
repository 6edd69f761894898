//! Persistence seams used by the engine.
//!
//! [`Database`](super::Database) implements them over PostgreSQL;
//! [`InMemoryStore`](super::InMemoryStore) implements them for tests.

use async_trait::async_trait;
use uuid::Uuid;

use super::FederationError;
use crate::models::{LocalOrganisationSettings, LocalUser, ProviderCredential, SettingsPatch};

/// A local recipient/team-member row before it becomes a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RecipientRow {
    pub name: Option<String>,
    pub email: String,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<Option<ProviderCredential>, FederationError>;

    /// Insert or replace the credential in a single statement.
    async fn upsert_credential(&self, credential: &ProviderCredential)
        -> Result<(), FederationError>;

    async fn delete_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<bool, FederationError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>, FederationError>;

    async fn insert_user(&self, user: &LocalUser) -> Result<(), FederationError>;
}

#[async_trait]
pub trait OrganisationStore: Send + Sync {
    /// Organisation the user belongs to, if any.
    async fn find_organisation_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, FederationError>;

    async fn find_settings(
        &self,
        org_id: Uuid,
    ) -> Result<Option<LocalOrganisationSettings>, FederationError>;

    /// Apply every assignment of the patch atomically, creating the row if
    /// the organisation has none yet.
    async fn apply_settings_patch(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError>;

    /// Like [`apply_settings_patch`](Self::apply_settings_patch), but each
    /// assignment only lands on a field that is still unset when the write
    /// happens (the logo also when it is still derived), and signature flags
    /// are skipped if they would leave every signature type disabled.
    async fn fill_unset_settings(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError>;
}

#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Past recipients of documents visible to the caller, most recent
    /// document first, one row per lower-cased email.
    async fn search_recent_recipients(
        &self,
        user_id: Uuid,
        team_id: Option<Uuid>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError>;

    /// Members of the team other than the caller.
    async fn search_team_members(
        &self,
        team_id: Uuid,
        exclude_user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn health_check(&self) -> Result<(), FederationError>;
}

/// Everything the engine needs from the relational store.
pub trait FederationStore: CredentialStore + UserStore + OrganisationStore + RecipientStore {}

impl<T> FederationStore for T where T: CredentialStore + UserStore + OrganisationStore + RecipientStore
{}

/// Case-insensitive substring match used by the in-memory store and to
/// mirror the SQL `ILIKE` filters.
pub fn matches_query(query: &str, name: Option<&str>, email: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    email.to_lowercase().contains(&query)
        || name.is_some_and(|n| n.to_lowercase().contains(&query))
}

/// Escape `%`, `_` and `\` for use inside an `ILIKE` pattern.
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
