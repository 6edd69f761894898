//! Authenticated calls to the provider's resource API.
//!
//! Every call takes an already-resolved access token. Responses are
//! translated uniformly: transport failures and 5xx become
//! `RemoteUnavailable`, other non-success statuses become `RemoteRejected`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use service_core::observability::{TracedClientExt, TracedRequest};

use super::FederationError;
use crate::models::remote::Page;
use crate::models::{
    NewConfigRecord, RemoteConfigRecord, RemoteDirectoryUser, RemoteUserPreferences,
    RemoteUserProfile,
};

/// Directory statuses offered as recipients.
const SEARCHABLE_USER_STATUSES: [&str; 2] = ["ACTIVE", "INVITED"];

#[async_trait]
pub trait RemoteResources: Send + Sync {
    /// `None` when the provider does not know the token's user.
    async fn current_user(&self, token: &str)
        -> Result<Option<RemoteUserProfile>, FederationError>;

    async fn user_preferences(&self, token: &str)
        -> Result<RemoteUserPreferences, FederationError>;

    async fn search_users(
        &self,
        token: &str,
        search: &str,
        take: usize,
        skip: usize,
    ) -> Result<Vec<RemoteDirectoryUser>, FederationError>;

    /// Config records visible to the token's user.
    async fn list_configs(
        &self,
        token: &str,
        identifier: &str,
    ) -> Result<Vec<RemoteConfigRecord>, FederationError>;

    async fn create_config(
        &self,
        token: &str,
        record: &NewConfigRecord,
    ) -> Result<(), FederationError>;

    async fn update_config(
        &self,
        token: &str,
        id: &str,
        payload: &Value,
    ) -> Result<(), FederationError>;
}

pub struct RemoteResourceClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteResourceClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/configs/{id}` with the id percent-encoded as one path segment.
    fn config_url(&self, id: &str) -> Result<reqwest::Url, FederationError> {
        let mut url = reqwest::Url::parse(&self.url("/configs"))
            .map_err(|e| anyhow::anyhow!("invalid resource API URL: {}", e))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("resource API URL cannot take a path"))?
            .push(id);
        Ok(url)
    }

    async fn send(&self, request: TracedRequest, token: &str) -> Result<Response, FederationError> {
        let response = request
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.is_server_error() {
            Err(FederationError::RemoteUnavailable(format!(
                "provider returned {}",
                status
            )))
        } else {
            Err(FederationError::RemoteRejected {
                status: status.as_u16(),
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: TracedRequest,
        token: &str,
    ) -> Result<T, FederationError> {
        let response = self.send(request, token).await?;
        response.json().await.map_err(|e| {
            FederationError::RemoteUnavailable(format!("unexpected provider response: {}", e))
        })
    }
}

fn not_found_as_none<T>(result: Result<T, FederationError>) -> Result<Option<T>, FederationError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(FederationError::RemoteRejected { status }) if status == StatusCode::NOT_FOUND.as_u16() => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl RemoteResources for RemoteResourceClient {
    #[tracing::instrument(skip_all)]
    async fn current_user(
        &self,
        token: &str,
    ) -> Result<Option<RemoteUserProfile>, FederationError> {
        let request = self.client.traced_get(&self.url("/auth/me"));
        not_found_as_none(self.get_json(request, token).await)
    }

    #[tracing::instrument(skip_all)]
    async fn user_preferences(
        &self,
        token: &str,
    ) -> Result<RemoteUserPreferences, FederationError> {
        let request = self.client.traced_get(&self.url("/user-preferences"));
        not_found_as_none(self.get_json(request, token).await).map(Option::unwrap_or_default)
    }

    #[tracing::instrument(skip(self, token))]
    async fn search_users(
        &self,
        token: &str,
        search: &str,
        take: usize,
        skip: usize,
    ) -> Result<Vec<RemoteDirectoryUser>, FederationError> {
        let mut query = vec![
            ("search", search.to_string()),
            ("take", take.to_string()),
            ("skip", skip.to_string()),
        ];
        query.extend(
            SEARCHABLE_USER_STATUSES
                .iter()
                .map(|status| ("status[]", status.to_string())),
        );

        let request = self.client.traced_get(&self.url("/users")).query(&query);
        let page: Page<RemoteDirectoryUser> = self.get_json(request, token).await?;
        Ok(page.data)
    }

    #[tracing::instrument(skip(self, token))]
    async fn list_configs(
        &self,
        token: &str,
        identifier: &str,
    ) -> Result<Vec<RemoteConfigRecord>, FederationError> {
        let request = self
            .client
            .traced_get(&self.url("/configs"))
            .query(&[("identifier", identifier)]);
        let page: Page<RemoteConfigRecord> = self.get_json(request, token).await?;
        Ok(page.data)
    }

    #[tracing::instrument(skip_all, fields(organisation_id = %record.organisation_id))]
    async fn create_config(
        &self,
        token: &str,
        record: &NewConfigRecord,
    ) -> Result<(), FederationError> {
        let request = self.client.traced_post(&self.url("/configs")).json(record);
        self.send(request, token).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, token, payload))]
    async fn update_config(
        &self,
        token: &str,
        id: &str,
        payload: &Value,
    ) -> Result<(), FederationError> {
        let url = self.config_url(id)?;
        let request = self
            .client
            .traced_patch(url.as_str())
            .json(&json!({ "payload": payload }));
        self.send(request, token).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeState {
        pub profile: Option<RemoteUserProfile>,
        pub preferences: RemoteUserPreferences,
        pub configs: Vec<RemoteConfigRecord>,
        pub directory: Vec<RemoteDirectoryUser>,
        /// Status returned by every call when set.
        pub fail_with: Option<FederationError>,
        pub created: Vec<NewConfigRecord>,
        pub updated: Vec<(String, Value)>,
        pub searches: Vec<(String, usize, usize)>,
        pub tokens_seen: Vec<String>,
    }

    /// In-process provider that records writes.
    #[derive(Default)]
    pub struct FakeRemote {
        pub state: Mutex<FakeState>,
    }

    impl FakeRemote {
        pub fn with(configure: impl FnOnce(&mut FakeState)) -> Self {
            let fake = Self::default();
            configure(&mut fake.state.lock().unwrap());
            fake
        }

        pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state.lock().unwrap()
        }

        fn check(&self, token: &str) -> Result<(), FederationError> {
            let mut state = self.state();
            state.tokens_seen.push(token.to_string());
            match &state.fail_with {
                Some(FederationError::RemoteRejected { status }) => {
                    Err(FederationError::RemoteRejected { status: *status })
                }
                Some(e) => Err(FederationError::RemoteUnavailable(e.to_string())),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RemoteResources for FakeRemote {
        async fn current_user(
            &self,
            token: &str,
        ) -> Result<Option<RemoteUserProfile>, FederationError> {
            self.check(token)?;
            Ok(self.state().profile.clone())
        }

        async fn user_preferences(
            &self,
            token: &str,
        ) -> Result<RemoteUserPreferences, FederationError> {
            self.check(token)?;
            Ok(self.state().preferences.clone())
        }

        async fn search_users(
            &self,
            token: &str,
            search: &str,
            take: usize,
            skip: usize,
        ) -> Result<Vec<RemoteDirectoryUser>, FederationError> {
            self.check(token)?;
            let mut state = self.state();
            state.searches.push((search.to_string(), take, skip));
            Ok(state.directory.iter().skip(skip).take(take).cloned().collect())
        }

        async fn list_configs(
            &self,
            token: &str,
            identifier: &str,
        ) -> Result<Vec<RemoteConfigRecord>, FederationError> {
            self.check(token)?;
            Ok(self
                .state()
                .configs
                .iter()
                .filter(|c| c.identifier == identifier)
                .cloned()
                .collect())
        }

        async fn create_config(
            &self,
            token: &str,
            record: &NewConfigRecord,
        ) -> Result<(), FederationError> {
            self.check(token)?;
            self.state().created.push(record.clone());
            Ok(())
        }

        async fn update_config(
            &self,
            token: &str,
            id: &str,
            payload: &Value,
        ) -> Result<(), FederationError> {
            self.check(token)?;
            self.state().updated.push((id.to_string(), payload.clone()));
            Ok(())
        }
    }
}
