//! Bearer authentication for user-scoped routes.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::AppState;

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Local user behind a verified provider-issued bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl AuthenticatedUser {
    /// Reject requests acting on another user's resources.
    pub fn require(self, user_id: Uuid) -> Result<Uuid, AppError> {
        if self.0 == user_id {
            Ok(user_id)
        } else {
            tracing::warn!(
                caller = %self.0,
                target_user = %user_id,
                "Cross-user request rejected"
            );
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Token does not belong to this user"
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

        let user_id = state.engine.authenticate_bearer_token(token).await?;
        Ok(AuthenticatedUser(user_id))
    }
}
