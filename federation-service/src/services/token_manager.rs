//! Per-user provider access tokens, refreshed shortly before they expire.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::key_set::Clock;
use super::store::CredentialStore;
use super::FederationError;
use crate::models::{ProviderCredential, TokenResponse};

/// Refresh window before expiry, in seconds.
pub const DEFAULT_REFRESH_BUFFER_SECONDS: i64 = 300;

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, FederationError>;
}

pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    clock: Arc<dyn Clock>,
    provider_kind: String,
    buffer_seconds: i64,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Option<Arc<dyn TokenRefresher>>,
        clock: Arc<dyn Clock>,
        provider_kind: &str,
        buffer_seconds: i64,
    ) -> Self {
        Self {
            store,
            refresher,
            clock,
            provider_kind: provider_kind.to_string(),
            buffer_seconds,
        }
    }

    pub fn provider_kind(&self) -> &str {
        &self.provider_kind
    }

    fn stamped(&self, credential: ProviderCredential) -> ProviderCredential {
        ProviderCredential {
            updated_utc: self.clock.now_utc(),
            ..credential
        }
    }

    /// A usable access token, or `None` when the user has no linked account
    /// or the store failed.
    pub async fn get_valid_access_token(&self, user_id: Uuid) -> Option<String> {
        match self.resolve_access_token(user_id).await {
            Ok(token) => Some(token),
            Err(FederationError::NoLinkedAccount) => None,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Could not resolve access token");
                None
            }
        }
    }

    /// Like [`get_valid_access_token`](Self::get_valid_access_token) but
    /// reports why no token is available.
    ///
    /// A failed refresh falls back to the stored (possibly rejected) token.
    /// Remote callers treat a 401 on that token the same as having no token.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_access_token(&self, user_id: Uuid) -> Result<String, FederationError> {
        let credential = self
            .store
            .find_credential(user_id, &self.provider_kind)
            .await?
            .ok_or(FederationError::NoLinkedAccount)?;

        let now = self.clock.now_seconds();
        if !credential.is_near_expiry(now, self.buffer_seconds) {
            return Ok(credential.access_token);
        }

        let (Some(refresh_token), Some(refresher)) =
            (credential.refresh_token.as_deref(), self.refresher.as_ref())
        else {
            tracing::debug!(user_id = %user_id, "Token near expiry and cannot be refreshed");
            return Ok(credential.access_token);
        };

        match refresher.refresh(refresh_token).await {
            Ok(response) => {
                let refreshed =
                    self.stamped(credential.refreshed(&response, self.clock.now_seconds()));
                if let Err(e) = self.store.upsert_credential(&refreshed).await {
                    // The provider may already have rotated the refresh
                    // token; the new access token is still good for this call.
                    tracing::error!(user_id = %user_id, error = %e, "Failed to persist refreshed token");
                } else {
                    tracing::info!(user_id = %user_id, expires_at = refreshed.expires_at, "Access token refreshed");
                }
                Ok(refreshed.access_token)
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Token refresh failed, using stored token");
                Ok(credential.access_token)
            }
        }
    }

    /// Store the result of a provider login for the user.
    pub async fn link_account(
        &self,
        user_id: Uuid,
        response: &TokenResponse,
    ) -> Result<(), FederationError> {
        let now = self.clock.now_seconds();
        let credential = match self
            .store
            .find_credential(user_id, &self.provider_kind)
            .await?
        {
            Some(existing) => existing.refreshed(response, now),
            None => ProviderCredential::new(
                user_id,
                &self.provider_kind,
                response.access_token.clone(),
                response.refresh_token.clone(),
                response.expires_at_from(now).unwrap_or(0),
            ),
        };

        self.store
            .upsert_credential(&self.stamped(credential))
            .await?;
        tracing::info!(user_id = %user_id, "Provider account linked");
        Ok(())
    }

    /// Remember a verified bearer token as the user's access token.
    ///
    /// An existing credential is only touched when the new token outlives the
    /// stored one; its refresh token is kept.
    pub async fn record_session_token(
        &self,
        user_id: Uuid,
        access_token: &str,
        expires_at: i64,
    ) -> Result<(), FederationError> {
        let existing = self
            .store
            .find_credential(user_id, &self.provider_kind)
            .await?;

        let credential = match existing {
            None => ProviderCredential::new(
                user_id,
                &self.provider_kind,
                access_token.to_string(),
                None,
                expires_at,
            ),
            Some(existing) if expires_at > existing.expires_at => ProviderCredential {
                access_token: access_token.to_string(),
                expires_at,
                ..existing
            },
            Some(_) => return Ok(()),
        };

        self.store
            .upsert_credential(&self.stamped(credential))
            .await
    }

    /// Remove the user's credential. Returns whether one existed.
    pub async fn unlink_account(&self, user_id: Uuid) -> Result<bool, FederationError> {
        let removed = self
            .store
            .delete_credential(user_id, &self.provider_kind)
            .await?;
        if removed {
            tracing::info!(user_id = %user_id, "Provider account unlinked");
        }
        Ok(removed)
    }
}
