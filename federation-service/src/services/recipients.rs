//! Recipient autocomplete across the provider directory, past recipients and
//! team members.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use super::remote_client::RemoteResources;
use super::store::{RecipientRow, RecipientStore};
use super::token_manager::TokenLifecycleManager;
use super::FederationError;
use crate::models::{is_valid_email, PaginatedSuggestions, RecipientSuggestion};

/// Extra past-recipient rows fetched to absorb duplicates.
const RECENT_RECIPIENT_SLACK: usize = 10;

#[derive(Debug, Clone)]
pub struct SuggestionQuery {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub query: String,
    pub take: usize,
    pub skip: usize,
}

impl SuggestionQuery {
    fn window_end(&self) -> usize {
        self.skip.saturating_add(self.take)
    }
}

/// Suggestion sources in priority order. On a duplicate email the earlier
/// source wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    RemoteDirectory,
    RecentRecipients,
    TeamMembers,
}

const SOURCES: [Source; 3] = [
    Source::RemoteDirectory,
    Source::RecentRecipients,
    Source::TeamMembers,
];

/// Merged, deduplicated suggestions in source priority order.
#[derive(Default)]
struct MergedSuggestions {
    seen: HashSet<String>,
    entries: Vec<RecipientSuggestion>,
}

impl MergedSuggestions {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn extend(&mut self, suggestions: impl IntoIterator<Item = RecipientSuggestion>) {
        for mut suggestion in suggestions {
            suggestion.email = suggestion.email.trim().to_string();
            if !is_valid_email(&suggestion.email) {
                continue;
            }
            if self.seen.insert(suggestion.key()) {
                self.entries.push(suggestion);
            }
        }
    }

    fn into_page(self, skip: usize, take: usize) -> PaginatedSuggestions {
        let end = skip.saturating_add(take);
        let has_more = self.entries.len() > end;
        PaginatedSuggestions {
            suggestions: self.entries.into_iter().skip(skip).take(take).collect(),
            has_more,
            next_skip: end,
        }
    }
}

fn from_row(row: RecipientRow) -> RecipientSuggestion {
    RecipientSuggestion::local(row.name, row.email)
}

pub struct RecipientSuggestionAggregator {
    tokens: Arc<TokenLifecycleManager>,
    remote: Option<Arc<dyn RemoteResources>>,
    recipients: Arc<dyn RecipientStore>,
}

impl RecipientSuggestionAggregator {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        remote: Option<Arc<dyn RemoteResources>>,
        recipients: Arc<dyn RecipientStore>,
    ) -> Self {
        Self {
            tokens,
            remote,
            recipients,
        }
    }

    /// One page of suggestions. Failing sources contribute nothing.
    #[tracing::instrument(skip(self), fields(user_id = %query.user_id))]
    pub async fn suggest(&self, query: &SuggestionQuery) -> PaginatedSuggestions {
        let mut merged = MergedSuggestions::default();

        for source in SOURCES {
            if source == Source::TeamMembers && merged.len() >= query.window_end() {
                break;
            }
            match self.fetch(source, query).await {
                Ok(suggestions) => merged.extend(suggestions),
                Err(e) => {
                    tracing::warn!(source = ?source, error = %e, "Suggestion source failed")
                }
            }
        }

        merged.into_page(query.skip, query.take)
    }

    async fn fetch(
        &self,
        source: Source,
        query: &SuggestionQuery,
    ) -> Result<Vec<RecipientSuggestion>, FederationError> {
        match source {
            Source::RemoteDirectory => self.fetch_remote_directory(query).await,
            Source::RecentRecipients => {
                let rows = self
                    .recipients
                    .search_recent_recipients(
                        query.user_id,
                        query.team_id,
                        &query.query,
                        query.window_end().saturating_add(RECENT_RECIPIENT_SLACK),
                    )
                    .await?;
                Ok(rows.into_iter().map(from_row).collect())
            }
            Source::TeamMembers => {
                let Some(team_id) = query.team_id else {
                    return Ok(Vec::new());
                };
                let rows = self
                    .recipients
                    .search_team_members(team_id, query.user_id, &query.query, query.window_end())
                    .await?;
                Ok(rows.into_iter().map(from_row).collect())
            }
        }
    }

    async fn fetch_remote_directory(
        &self,
        query: &SuggestionQuery,
    ) -> Result<Vec<RecipientSuggestion>, FederationError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(Vec::new());
        };
        let Some(token) = self.tokens.get_valid_access_token(query.user_id).await else {
            return Ok(Vec::new());
        };

        // The directory is paged independently of the merged list, so it is
        // always read from the start.
        let users = remote
            .search_users(&token, &query.query, query.window_end().saturating_add(1), 0)
            .await?;

        Ok(users
            .into_iter()
            .filter_map(|user| {
                Some(RecipientSuggestion {
                    email: user.email?,
                    name: user.name,
                    avatar_url: user.avatar,
                    organisation_name: user.organisation.and_then(|o| o.name),
                })
            })
            .collect())
    }
}
