//! Recipient suggestion model.

use serde::Serialize;
use validator::ValidateEmail;

/// One entry in the recipient autocomplete list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientSuggestion {
    pub name: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organisation_name: Option<String>,
}

impl RecipientSuggestion {
    pub fn local(name: Option<String>, email: String) -> Self {
        Self {
            name,
            email,
            avatar_url: None,
            organisation_name: None,
        }
    }

    /// Deduplication key.
    pub fn key(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// One page of suggestions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedSuggestions {
    pub suggestions: Vec<RecipientSuggestion>,
    pub has_more: bool,
    pub next_skip: usize,
}

/// Basic email syntax check shared by every suggestion source.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.len() <= 255 && email.to_string().validate_email()
}
