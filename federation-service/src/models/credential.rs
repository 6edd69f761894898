//! Provider credential model - per-user tokens issued by the identity provider.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Access/refresh token pair held for one (user, provider) pair.
///
/// `expires_at` is in epoch seconds; `0` means the provider never told us.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProviderCredential {
    pub user_id: Uuid,
    pub provider_kind: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub updated_utc: DateTime<Utc>,
}

impl ProviderCredential {
    pub fn new(
        user_id: Uuid,
        provider_kind: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            user_id,
            provider_kind: provider_kind.to_string(),
            access_token,
            refresh_token,
            expires_at,
            updated_utc: Utc::now(),
        }
    }

    /// True when the token expires within `buffer_seconds` of `now`.
    /// A credential without a known expiry is never near expiry.
    pub fn is_near_expiry(&self, now: i64, buffer_seconds: i64) -> bool {
        self.expires_at > 0 && self.expires_at - buffer_seconds < now
    }

    /// Credential after a successful token grant.
    ///
    /// Keeps the existing refresh token unless the provider rotated it, and
    /// never moves the expiry backwards.
    pub fn refreshed(&self, response: &TokenResponse, now: i64) -> Self {
        let expires_at = response
            .expires_at_from(now)
            .map_or(self.expires_at, |exp| exp.max(self.expires_at));

        Self {
            user_id: self.user_id,
            provider_kind: self.provider_kind.clone(),
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            expires_at,
            updated_utc: Utc::now(),
        }
    }
}

/// OAuth2 token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in epoch seconds, preferring `expires_at` when present.
    pub fn expires_at_from(&self, now: i64) -> Option<i64> {
        self.expires_at
            .or_else(|| self.expires_in.map(|seconds| now.saturating_add(seconds)))
    }
}
