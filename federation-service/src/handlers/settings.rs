use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::auth::AuthenticatedUser;
use crate::{models::SettingsPatch, AppState};

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SyncResponse {
    fn from_outcome(success: bool, warning: &str) -> Self {
        Self {
            success,
            warning: (!success).then(|| warning.to_string()),
        }
    }
}

/// Pull the provider's settings into the user's organisation.
pub async fn pull_settings(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SyncResponse>, AppError> {
    let user_id = caller.require(user_id)?;
    let success = state.engine.pull_remote_settings(user_id).await;
    Ok(Json(SyncResponse::from_outcome(
        success,
        "Settings could not be synchronised from the identity provider",
    )))
}

/// Update organisation settings locally and push them to the provider.
///
/// The local update is authoritative; a failed push is reported as a warning.
pub async fn update_settings(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SyncResponse>, AppError> {
    let user_id = caller.require(user_id)?;
    patch.validate()?;

    let update = state.engine.push_local_settings(user_id, patch).await?;
    Ok(Json(SyncResponse::from_outcome(
        update.pushed,
        "Settings saved locally but not synchronised to the identity provider",
    )))
}
