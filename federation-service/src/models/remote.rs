//! Wire types for the provider's resource endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of the config record that carries organisation settings.
pub const SETTINGS_BUNDLE_IDENTIFIER: &str = "settings-bundle";

/// `GET /auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub organisation: Option<RemoteOrganisation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrganisation {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl RemoteOrganisation {
    /// A root organisation has no parent and owns document-wide policy.
    pub fn is_root(&self) -> bool {
        self.parent_id.as_deref().map_or(true, str::is_empty)
    }
}

/// `GET /user-preferences`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteUserPreferences {
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub date_format: Option<String>,
}

/// Entry of `GET /users`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDirectoryUser {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub organisation: Option<RemoteOrganisation>,
}

/// Entry of `GET /configs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigRecord {
    pub id: String,
    pub organisation_id: String,
    pub identifier: String,
    #[serde(default)]
    pub payload: Value,
}

/// Body of `POST /configs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConfigRecord {
    pub organisation_id: String,
    pub identifier: String,
    pub payload: Value,
}

/// List envelope used by the provider's collection endpoints.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
}
