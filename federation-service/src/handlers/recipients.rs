use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::auth::AuthenticatedUser;
use crate::{models::PaginatedSuggestions, services::SuggestionQuery, AppState};

fn default_take() -> usize {
    10
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecipientSearchParams {
    pub team_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = 256))]
    pub query: String,
    #[serde(default = "default_take")]
    #[validate(range(min = 1, max = 100))]
    pub take: usize,
    #[serde(default)]
    pub skip: usize,
}

/// Recipient autocomplete for the user.
pub async fn search_recipients(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Query(params): Query<RecipientSearchParams>,
) -> Result<Json<PaginatedSuggestions>, AppError> {
    let user_id = caller.require(user_id)?;
    params.validate()?;

    let query = SuggestionQuery {
        user_id,
        team_id: params.team_id,
        query: params.query.trim().to_string(),
        take: params.take,
        skip: params.skip,
    };

    Ok(Json(state.engine.search_recipients(&query).await))
}
