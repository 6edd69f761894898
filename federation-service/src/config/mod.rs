use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub tokens: TokenConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Discovery lives at `{issuer_url}/.well-known/openid-configuration`.
    pub issuer_url: String,
    /// Base URL of the resource API (`/auth/me`, `/users`, `/configs`).
    pub api_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Key of the credential row, one per provider.
    pub kind: String,
    pub scopes: String,
    pub http_timeout_seconds: u64,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.issuer_url.trim().is_empty() && !self.client_id.trim().is_empty()
    }

    /// Resource API base, falling back to the issuer.
    pub fn resource_base_url(&self) -> &str {
        if self.api_url.trim().is_empty() {
            &self.issuer_url
        } else {
            &self.api_url
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_buffer_seconds: i64,
    pub key_set_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl FederationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = FederationConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("federation-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .filter(|endpoint| !endpoint.trim().is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            provider: ProviderConfig {
                issuer_url: get_env("PROVIDER_ISSUER_URL", Some(""), is_prod)?,
                api_url: get_env("PROVIDER_API_URL", Some(""), false)?,
                client_id: get_env("PROVIDER_CLIENT_ID", Some(""), is_prod)?,
                client_secret: SecretString::new(get_env(
                    "PROVIDER_CLIENT_SECRET",
                    Some(""),
                    is_prod,
                )?),
                kind: get_env("PROVIDER_KIND", Some("oidc"), false)?,
                scopes: get_env(
                    "PROVIDER_SCOPES",
                    Some("openid email profile offline_access"),
                    false,
                )?,
                http_timeout_seconds: parse_env("PROVIDER_HTTP_TIMEOUT_SECONDS", "10", false)?,
            },
            tokens: TokenConfig {
                refresh_buffer_seconds: parse_env("TOKEN_REFRESH_BUFFER_SECONDS", "300", false)?,
                key_set_ttl_seconds: parse_env("KEY_SET_TTL_SECONDS", "3600", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.tokens.refresh_buffer_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_REFRESH_BUFFER_SECONDS must be positive"
            )));
        }

        if self.tokens.key_set_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "KEY_SET_TTL_SECONDS must be positive"
            )));
        }

        if self.provider.http_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PROVIDER_HTTP_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.provider.issuer_url.trim().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "PROVIDER_ISSUER_URL must be set in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        if !self.provider.is_configured() {
            tracing::warn!("Identity provider not configured; federation is disabled");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
