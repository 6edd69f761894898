//! In-memory store used by tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{
    matches_query, CredentialStore, OrganisationStore, RecipientRow, RecipientStore, StoreHealth,
    UserStore,
};
use super::FederationError;
use crate::models::{LocalOrganisationSettings, LocalUser, ProviderCredential, SettingsPatch};

#[derive(Debug, Clone)]
struct DocumentRecord {
    owner_id: Uuid,
    team_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
    recipients: Vec<RecipientRow>,
}

#[derive(Default)]
struct State {
    credentials: HashMap<(Uuid, String), ProviderCredential>,
    users: HashMap<Uuid, LocalUser>,
    memberships: Vec<(Uuid, Uuid)>,
    settings: HashMap<Uuid, LocalOrganisationSettings>,
    documents: Vec<DocumentRecord>,
    team_members: HashMap<Uuid, Vec<Uuid>>,
    credential_writes: usize,
    settings_writes: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, FederationError> {
        self.state
            .lock()
            .map_err(|e| FederationError::Internal(anyhow::anyhow!("Store mutex poisoned: {}", e)))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    // ---- seeding helpers ----

    pub fn add_user(&self, email: &str, name: Option<&str>) -> Uuid {
        let user = LocalUser::new(email, name.map(str::to_string));
        let user_id = user.user_id;
        self.with_state(|s| s.users.insert(user_id, user));
        user_id
    }

    pub fn add_membership(&self, org_id: Uuid, user_id: Uuid) {
        self.with_state(|s| s.memberships.push((org_id, user_id)));
    }

    pub fn put_settings(&self, settings: LocalOrganisationSettings) {
        self.with_state(|s| s.settings.insert(settings.org_id, settings));
    }

    pub fn put_credential(&self, credential: ProviderCredential) {
        self.with_state(|s| {
            s.credentials.insert(
                (credential.user_id, credential.provider_kind.clone()),
                credential,
            )
        });
    }

    /// Record a document and its recipients as `(email, name)` pairs.
    pub fn add_document(
        &self,
        owner_id: Uuid,
        team_id: Option<Uuid>,
        created_utc: DateTime<Utc>,
        recipients: &[(&str, Option<&str>)],
    ) {
        let recipients = recipients
            .iter()
            .map(|(email, name)| RecipientRow {
                name: name.map(str::to_string),
                email: email.to_string(),
            })
            .collect();
        self.with_state(|s| {
            s.documents.push(DocumentRecord {
                owner_id,
                team_id,
                created_utc,
                recipients,
            })
        });
    }

    pub fn add_team_member(&self, team_id: Uuid, user_id: Uuid) {
        self.with_state(|s| s.team_members.entry(team_id).or_default().push(user_id));
    }

    // ---- inspection helpers ----

    pub fn credential(&self, user_id: Uuid, provider_kind: &str) -> Option<ProviderCredential> {
        self.with_state(|s| {
            s.credentials
                .get(&(user_id, provider_kind.to_string()))
                .cloned()
        })
    }

    pub fn settings(&self, org_id: Uuid) -> Option<LocalOrganisationSettings> {
        self.with_state(|s| s.settings.get(&org_id).cloned())
    }

    pub fn user_count(&self) -> usize {
        self.with_state(|s| s.users.len())
    }

    pub fn credential_writes(&self) -> usize {
        self.with_state(|s| s.credential_writes)
    }

    pub fn settings_writes(&self) -> usize {
        self.with_state(|s| s.settings_writes)
    }
}

#[async_trait]
impl StoreHealth for InMemoryStore {
    async fn health_check(&self) -> Result<(), FederationError> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn find_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<Option<ProviderCredential>, FederationError> {
        Ok(self
            .lock()?
            .credentials
            .get(&(user_id, provider_kind.to_string()))
            .cloned())
    }

    async fn upsert_credential(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), FederationError> {
        let mut state = self.lock()?;
        state.credentials.insert(
            (credential.user_id, credential.provider_kind.clone()),
            credential.clone(),
        );
        state.credential_writes += 1;
        Ok(())
    }

    async fn delete_credential(
        &self,
        user_id: Uuid,
        provider_kind: &str,
    ) -> Result<bool, FederationError> {
        Ok(self
            .lock()?
            .credentials
            .remove(&(user_id, provider_kind.to_string()))
            .is_some())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<LocalUser>, FederationError> {
        let email = email.trim().to_lowercase();
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn insert_user(&self, user: &LocalUser) -> Result<(), FederationError> {
        let mut state = self.lock()?;
        let email = user.email.to_lowercase();
        if state.users.values().any(|u| u.email.to_lowercase() == email) {
            return Err(FederationError::ValidationFailed(format!(
                "User {} already exists",
                user.email
            )));
        }
        state.users.insert(user.user_id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl OrganisationStore for InMemoryStore {
    async fn find_organisation_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, FederationError> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .find(|(_, member)| *member == user_id)
            .map(|(org_id, _)| *org_id))
    }

    async fn find_settings(
        &self,
        org_id: Uuid,
    ) -> Result<Option<LocalOrganisationSettings>, FederationError> {
        Ok(self.lock()?.settings.get(&org_id).cloned())
    }

    async fn apply_settings_patch(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        let settings = state
            .settings
            .entry(org_id)
            .or_insert_with(|| LocalOrganisationSettings::empty(org_id));
        patch.apply_to(settings);
        state.settings_writes += 1;
        Ok(())
    }

    async fn fill_unset_settings(
        &self,
        org_id: Uuid,
        patch: &SettingsPatch,
    ) -> Result<(), FederationError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        let settings = state
            .settings
            .entry(org_id)
            .or_insert_with(|| LocalOrganisationSettings::empty(org_id));
        patch.fill_unset_in(settings);
        state.settings_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl RecipientStore for InMemoryStore {
    async fn search_recent_recipients(
        &self,
        user_id: Uuid,
        team_id: Option<Uuid>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError> {
        let state = self.lock()?;
        let mut documents: Vec<&DocumentRecord> = state
            .documents
            .iter()
            .filter(|d| match team_id {
                Some(team_id) => d.team_id == Some(team_id),
                None => d.team_id.is_none() && d.owner_id == user_id,
            })
            .collect();
        documents.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));

        let mut seen = HashSet::new();
        let rows = documents
            .into_iter()
            .flat_map(|d| d.recipients.iter())
            .filter(|r| matches_query(query, r.name.as_deref(), &r.email))
            .filter(|r| seen.insert(r.email.to_lowercase()))
            .take(limit)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn search_team_members(
        &self,
        team_id: Uuid,
        exclude_user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecipientRow>, FederationError> {
        let state = self.lock()?;
        let rows = state
            .team_members
            .get(&team_id)
            .into_iter()
            .flatten()
            .filter(|member| **member != exclude_user_id)
            .filter_map(|member| state.users.get(member))
            .filter(|u| matches_query(query, u.name.as_deref(), &u.email))
            .take(limit)
            .map(|u| RecipientRow {
                name: u.name.clone(),
                email: u.email.clone(),
            })
            .collect();
        Ok(rows)
    }
}
