//! PostgreSQL pool for the local user, credential, organisation and
//! document tables.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::services::FederationError;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
}

/// Connect and bring the schema up to date.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, FederationError> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = pool_options(config).connect(&config.url).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;
    tracing::info!("Database migrations completed");

    Ok(pool)
}
