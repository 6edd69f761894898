use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::auth::{bearer_token, AuthenticatedUser};
use crate::{services::FederationError, AppState};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
}

/// Exchange a provider-issued bearer token for a local user id.
pub async fn bootstrap_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AppError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let user_id = state
        .engine
        .bootstrap_session_from_bearer_token(token)
        .await?;

    Ok(Json(SessionResponse { user_id }))
}

/// Forget the user's provider credential.
pub async fn unlink_account(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let user_id = caller.require(user_id)?;
    if state.engine.unlink_account(user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(FederationError::NoLinkedAccount.into())
    }
}
