use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FederationError {
    /// Bad, expired or malformed bearer token, or no verification key.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Identity provider is not configured")]
    NotConfigured,

    /// Network failure, timeout or 5xx from the provider.
    #[error("Identity provider unavailable: {0}")]
    RemoteUnavailable(String),

    /// The provider answered but refused the call (401, 403, other 4xx).
    #[error("Identity provider rejected request with status {status}")]
    RemoteRejected { status: u16 },

    #[error("User has no linked provider account")]
    NoLinkedAccount,

    #[error("User is not a member of any organisation")]
    NoOrganisation,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FederationError {
    /// Remote failures that callers treat as "no token / no data" rather
    /// than as errors.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            FederationError::RemoteUnavailable(_)
                | FederationError::RemoteRejected { .. }
                | FederationError::NoLinkedAccount
                | FederationError::NotConfigured
        )
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::RemoteUnavailable(err.to_string())
    }
}

impl From<FederationError> for AppError {
    fn from(err: FederationError) -> Self {
        match err {
            FederationError::Unauthorized(reason) => {
                AppError::Unauthorized(anyhow::anyhow!(reason))
            }
            FederationError::NotConfigured => {
                AppError::ConfigError(anyhow::anyhow!("Identity provider is not configured"))
            }
            FederationError::RemoteUnavailable(e) => AppError::BadGateway(e),
            FederationError::RemoteRejected { status } => {
                AppError::BadGateway(format!("Identity provider returned {}", status))
            }
            FederationError::NoLinkedAccount => {
                AppError::NotFound(anyhow::anyhow!("No linked provider account"))
            }
            FederationError::NoOrganisation => {
                AppError::NotFound(anyhow::anyhow!("Organisation membership not found"))
            }
            FederationError::ValidationFailed(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            FederationError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            FederationError::Internal(e) => AppError::InternalError(e),
        }
    }
}
