pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use service_core::axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::FederationConfig;
use crate::services::{
    FederationEngine, FederationStore, JwtVerifier, KeySetCache, ProviderClient, ProviderLinks,
    RemoteResourceClient, StoreHealth, SystemClock, TokenPolicy,
};

#[derive(Clone)]
pub struct AppState {
    pub config: FederationConfig,
    pub engine: Arc<FederationEngine>,
    pub store: Arc<dyn StoreHealth>,
}

/// Wire the engine to the configured provider. Without a provider the engine
/// still serves local recipient suggestions and rejects session bootstrap.
pub fn build_engine<S>(config: &FederationConfig, store: Arc<S>) -> Result<FederationEngine, AppError>
where
    S: FederationStore + 'static,
{
    let links = if config.provider.is_configured() {
        let http = reqwest::Client::builder()
            .timeout(config.provider.http_timeout())
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("HTTP client: {}", e)))?;

        let provider = Arc::new(ProviderClient::new(
            http.clone(),
            &config.provider.issuer_url,
            &config.provider.client_id,
            config.provider.client_secret.clone(),
            &config.provider.scopes,
            config.provider.http_timeout(),
        ));
        let key_ttl = Duration::from_secs(config.tokens.key_set_ttl_seconds.unsigned_abs());
        let keys = Arc::new(KeySetCache::new(
            provider.clone(),
            Arc::new(SystemClock),
            key_ttl,
        ));

        tracing::info!(issuer = %config.provider.issuer_url, "Identity provider configured");
        ProviderLinks {
            verifier: Some(Arc::new(JwtVerifier::new(keys))),
            remote: Some(Arc::new(RemoteResourceClient::new(
                http,
                config.provider.resource_base_url(),
                config.provider.http_timeout(),
            ))),
            refresher: Some(provider),
        }
    } else {
        ProviderLinks::default()
    };

    Ok(FederationEngine::new(
        store,
        links,
        Arc::new(SystemClock),
        TokenPolicy {
            provider_kind: config.provider.kind.clone(),
            refresh_buffer_seconds: config.tokens.refresh_buffer_seconds,
        },
    ))
}

pub fn build_router(state: AppState) -> Router {
    let federation_routes = Router::new()
        .route("/federation/session", post(handlers::bootstrap_session))
        .route(
            "/federation/users/:user_id/settings/pull",
            post(handlers::pull_settings),
        )
        .route(
            "/federation/users/:user_id/settings",
            put(handlers::update_settings),
        )
        .route(
            "/federation/users/:user_id/recipients",
            get(handlers::search_recipients),
        )
        .route(
            "/federation/users/:user_id/link",
            delete(handlers::unlink_account),
        );

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    Router::new()
        .route("/health", get(health_check))
        .merge(federation_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        )
}

/// Service health check
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "identity_provider": if state.engine.is_configured() { "configured" } else { "not_configured" }
        }
    })))
}
