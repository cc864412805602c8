// config.rs
use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub results_cache_ttl: Duration,
    /// Header carrying the caller identity verified by the upstream token issuer.
    pub identity_header: Option<String>,
    /// `None` allows any origin.
    pub cors_allowed_origins: Option<Vec<String>>,
    pub redis_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            database_url: "sqlite://polls.db".to_string(),
            database_max_connections: 5,
            results_cache_ttl: Duration::from_secs(5),
            identity_header: None,
            cors_allowed_origins: None,
            redis_url: None,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_max_connections: u32 = try_load(
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        )?;
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                reason: "must be at least 1".to_string(),
            });
        }

        let ttl_secs: u64 = try_load("RESULTS_CACHE_TTL_SECS", defaults.results_cache_ttl.as_secs())?;

        let identity_header = optional("IDENTITY_HEADER").map(|name| name.to_ascii_lowercase());
        if let Some(name) = &identity_header {
            http::HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Invalid {
                key: "IDENTITY_HEADER",
                reason: e.to_string(),
            })?;
        }

        let cors_allowed_origins = optional("CORS_ALLOWED_ORIGINS").map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect()
        });

        Ok(Self {
            host: optional("HOST").unwrap_or(defaults.host),
            port: try_load("PORT", defaults.port)?,
            database_url: optional("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections,
            results_cache_ttl: Duration::from_secs(ttl_secs),
            identity_header,
            cors_allowed_origins,
            redis_url: optional("REDIS_URL"),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
