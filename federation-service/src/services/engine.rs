//! Entry points exposed to the HTTP layer.

use std::sync::Arc;

use uuid::Uuid;

use super::jwt::{JwtVerifier, VerifiedClaims};
use super::key_set::Clock;
use super::recipients::{RecipientSuggestionAggregator, SuggestionQuery};
use super::remote_client::RemoteResources;
use super::settings_sync::SettingsSynchronizer;
use super::store::{FederationStore, OrganisationStore, UserStore};
use super::token_manager::{TokenLifecycleManager, TokenRefresher};
use super::FederationError;
use crate::models::{LocalUser, PaginatedSuggestions, SettingsPatch, TokenResponse};

/// Provider-facing collaborators. All absent when no provider is configured.
#[derive(Clone, Default)]
pub struct ProviderLinks {
    pub verifier: Option<Arc<JwtVerifier>>,
    pub remote: Option<Arc<dyn RemoteResources>>,
    pub refresher: Option<Arc<dyn TokenRefresher>>,
}

#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub provider_kind: String,
    pub refresh_buffer_seconds: i64,
}

/// Result of a local settings update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// Whether the provider accepted the new values.
    pub pushed: bool,
}

pub struct FederationEngine {
    verifier: Option<Arc<JwtVerifier>>,
    tokens: Arc<TokenLifecycleManager>,
    settings: SettingsSynchronizer,
    recipients: RecipientSuggestionAggregator,
    users: Arc<dyn UserStore>,
    organisations: Arc<dyn OrganisationStore>,
}

impl FederationEngine {
    pub fn new<S>(
        store: Arc<S>,
        links: ProviderLinks,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
    ) -> Self
    where
        S: FederationStore + 'static,
    {
        let tokens = Arc::new(TokenLifecycleManager::new(
            store.clone(),
            links.refresher,
            clock,
            &policy.provider_kind,
            policy.refresh_buffer_seconds,
        ));

        Self {
            verifier: links.verifier,
            settings: SettingsSynchronizer::new(
                tokens.clone(),
                links.remote.clone(),
                store.clone(),
            ),
            recipients: RecipientSuggestionAggregator::new(
                tokens.clone(),
                links.remote,
                store.clone(),
            ),
            tokens,
            users: store.clone(),
            organisations: store,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.verifier.is_some()
    }

    /// Verify a provider-issued bearer token and map it to a local user,
    /// creating the user on first sight.
    ///
    /// The token is remembered as the user's access token and a settings pull
    /// is attempted; a failed pull does not fail the bootstrap.
    #[tracing::instrument(skip_all)]
    pub async fn bootstrap_session_from_bearer_token(
        &self,
        token: &str,
    ) -> Result<Uuid, FederationError> {
        let claims = self.verify_bearer_token(token).await?;

        let user = self.find_or_create_user(&claims.email, claims.name).await?;
        self.tokens
            .record_session_token(user.user_id, token, claims.expires_at)
            .await?;

        if !self.settings.sync_remote_to_local(user.user_id).await {
            tracing::warn!(user_id = %user.user_id, "Settings pull after sign-in did not complete");
        }

        tracing::info!(user_id = %user.user_id, "Federated session established");
        Ok(user.user_id)
    }

    /// Local user a bearer token belongs to. Unlike session bootstrap this
    /// never provisions a user or records the token.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate_bearer_token(&self, token: &str) -> Result<Uuid, FederationError> {
        let claims = self.verify_bearer_token(token).await?;
        let user = self
            .users
            .find_user_by_email(&claims.email)
            .await?
            .ok_or_else(|| {
                FederationError::Unauthorized("no local user for this token".to_string())
            })?;
        Ok(user.user_id)
    }

    async fn verify_bearer_token(&self, token: &str) -> Result<VerifiedClaims, FederationError> {
        let verifier = self.verifier.as_ref().ok_or(FederationError::NotConfigured)?;
        verifier.verify(token).await.map_err(|e| {
            tracing::info!(reason = %e, "Bearer token rejected");
            FederationError::from(e)
        })
    }

    async fn find_or_create_user(
        &self,
        email: &str,
        name: Option<String>,
    ) -> Result<LocalUser, FederationError> {
        if let Some(user) = self.users.find_user_by_email(email).await? {
            return Ok(user);
        }

        let user = LocalUser::new(email, name);
        match self.users.insert_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.user_id, "Provisioned federated user");
                Ok(user)
            }
            // Lost a race with a concurrent sign-in for the same email.
            Err(e) => self.users.find_user_by_email(email).await?.ok_or(e),
        }
    }

    pub async fn get_valid_access_token(&self, user_id: Uuid) -> Option<String> {
        self.tokens.get_valid_access_token(user_id).await
    }

    pub async fn pull_remote_settings(&self, user_id: Uuid) -> bool {
        self.settings.sync_remote_to_local(user_id).await
    }

    /// Apply an administrator's changes locally, then push the organisation's
    /// settings to the provider. A failed push leaves the local change in
    /// place.
    #[tracing::instrument(skip(self, patch))]
    pub async fn push_local_settings(
        &self,
        user_id: Uuid,
        patch: SettingsPatch,
    ) -> Result<SettingsUpdate, FederationError> {
        let org_id = self
            .organisations
            .find_organisation_for_user(user_id)
            .await?
            .ok_or(FederationError::NoOrganisation)?;

        let patch = patch.mark_logo_user_set();
        self.organisations.apply_settings_patch(org_id, &patch).await?;

        let settings = self
            .organisations
            .find_settings(org_id)
            .await?
            .ok_or_else(|| {
                FederationError::Internal(anyhow::anyhow!(
                    "settings for organisation {} missing after update",
                    org_id
                ))
            })?;

        let pushed = self.settings.sync_local_to_remote(user_id, &settings).await;
        Ok(SettingsUpdate { pushed })
    }

    pub async fn search_recipients(&self, query: &SuggestionQuery) -> PaginatedSuggestions {
        self.recipients.suggest(query).await
    }

    pub async fn link_account(
        &self,
        user_id: Uuid,
        response: &TokenResponse,
    ) -> Result<(), FederationError> {
        self.tokens.link_account(user_id, response).await
    }

    pub async fn unlink_account(&self, user_id: Uuid) -> Result<bool, FederationError> {
        self.tokens.unlink_account(user_id).await
    }
}
