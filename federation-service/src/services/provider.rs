//! OpenID provider endpoints: discovery, key set and token grant.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use service_core::observability::TracedClientExt;

use super::key_set::KeySetSource;
use super::token_manager::TokenRefresher;
use super::FederationError;
use crate::models::TokenResponse;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

pub struct ProviderClient {
    client: Client,
    issuer_url: String,
    client_id: String,
    client_secret: SecretString,
    scopes: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(
        client: Client,
        issuer_url: &str,
        client_id: &str,
        client_secret: SecretString,
        scopes: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret,
            scopes: scopes.to_string(),
            timeout,
        }
    }

    fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer_url)
    }

    /// Fetched on every use; both callers are already rate limited (key set
    /// TTL, near-expiry refresh).
    pub async fn discover(&self) -> Result<DiscoveryDocument, FederationError> {
        let response = self
            .client
            .traced_get(&self.discovery_url())
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FederationError::RemoteUnavailable(format!(
                "discovery document returned {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| {
            FederationError::RemoteUnavailable(format!("invalid discovery document: {}", e))
        })
    }
}

#[async_trait]
impl KeySetSource for ProviderClient {
    #[tracing::instrument(skip(self))]
    async fn fetch_key_set(&self) -> Result<JwkSet, FederationError> {
        let discovery = self.discover().await?;

        let response = self
            .client
            .traced_get(&discovery.jwks_uri)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FederationError::RemoteUnavailable(format!(
                "key set endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FederationError::RemoteUnavailable(format!("invalid key set: {}", e)))
    }
}

#[async_trait]
impl TokenRefresher for ProviderClient {
    #[tracing::instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, FederationError> {
        let discovery = self.discover().await?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("scope", self.scopes.as_str()),
        ];

        let response = self
            .client
            .traced_post(&discovery.token_endpoint)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FederationError::RemoteRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FederationError::RemoteUnavailable(format!(
                "token endpoint returned {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            FederationError::RemoteUnavailable(format!("invalid token response: {}", e))
        })
    }
}
