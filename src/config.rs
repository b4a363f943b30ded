//! Environment-based configuration for the authorization server core.

use anyhow::Result;
use chrono::Duration;

use crate::errors::ConfigError;

/// Main server configuration
#[derive(Clone)]
pub struct Config {
    /// Issuer URL, the server's external base
    pub issuer: String,
    /// External login interaction endpoint
    pub login_endpoint: String,
    /// External consent interaction endpoint
    pub consent_endpoint: String,
    /// Global secret for HMAC-signed opaque tokens
    pub global_secret: String,
    pub authorize_code_lifespan: Duration,
    pub access_token_lifespan: Duration,
    pub refresh_token_lifespan: Duration,
    pub id_token_lifespan: Duration,
    /// Lifespan of login/consent challenge tokens
    pub challenge_token_lifespan: Duration,
    /// How long a suspended request stays resumable
    pub suspension_ttl: Duration,
    /// Cache TTL for fetched request objects and client key sets
    pub document_cache_ttl: Duration,
    /// Timeout applied to every remote fetch
    pub http_client_timeout: std::time::Duration,
    /// Accept `alg=none` request objects (audience-bound)
    pub allow_unsigned_request_objects: bool,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let issuer = require_env("OIDP_EXTERNAL_BASE")?;
        let login_endpoint = optional_env("OIDP_LOGIN_ENDPOINT")
            .unwrap_or_else(|| format!("{}/interaction/login", issuer.trim_end_matches('/')));
        let consent_endpoint = optional_env("OIDP_CONSENT_ENDPOINT")
            .unwrap_or_else(|| format!("{}/interaction/consent", issuer.trim_end_matches('/')));

        Ok(Self {
            issuer,
            login_endpoint,
            consent_endpoint,
            global_secret: require_env("OIDP_GLOBAL_SECRET")?,
            authorize_code_lifespan: duration_env("OIDP_AUTHORIZE_CODE_LIFESPAN", "10m")?,
            access_token_lifespan: duration_env("OIDP_ACCESS_TOKEN_LIFESPAN", "1h")?,
            refresh_token_lifespan: duration_env("OIDP_REFRESH_TOKEN_LIFESPAN", "30d")?,
            id_token_lifespan: duration_env("OIDP_ID_TOKEN_LIFESPAN", "1h")?,
            challenge_token_lifespan: duration_env("OIDP_CHALLENGE_TOKEN_LIFESPAN", "5m")?,
            suspension_ttl: duration_env("OIDP_SUSPENSION_TTL", "15m")?,
            document_cache_ttl: duration_env("OIDP_DOCUMENT_CACHE_TTL", "1h")?,
            http_client_timeout: std::time::Duration::from_secs(
                duration_env("OIDP_HTTP_CLIENT_TIMEOUT", "10s")?.num_seconds().max(1) as u64,
            ),
            allow_unsigned_request_objects: bool_env("OIDP_ALLOW_UNSIGNED_REQUEST_OBJECTS", false)?,
        })
    }

    /// Defaults for a given issuer; used by tests and embedders that wire
    /// configuration programmatically
    pub fn with_defaults(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let base = issuer.trim_end_matches('/').to_string();
        Self {
            login_endpoint: format!("{}/interaction/login", base),
            consent_endpoint: format!("{}/interaction/consent", base),
            issuer,
            global_secret: "development-global-secret-change-me".to_string(),
            authorize_code_lifespan: Duration::minutes(10),
            access_token_lifespan: Duration::hours(1),
            refresh_token_lifespan: Duration::days(30),
            id_token_lifespan: Duration::hours(1),
            challenge_token_lifespan: Duration::minutes(5),
            suspension_ttl: Duration::minutes(15),
            document_cache_ttl: Duration::hours(1),
            http_client_timeout: std::time::Duration::from_secs(10),
            allow_unsigned_request_objects: false,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ConfigError::EnvVarRequired(key.to_string()).into())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn duration_env(key: &str, default: &str) -> Result<Duration> {
    let raw = optional_env(key).unwrap_or_else(|| default.to_string());
    let parsed = duration_str::parse(&raw)
        .map_err(|e| ConfigError::DurationParsingFailed(raw.clone(), e.to_string()))?;
    Duration::from_std(parsed)
        .map_err(|e| ConfigError::DurationParsingFailed(raw, e.to_string()).into())
}

fn bool_env(key: &str, default: bool) -> Result<bool> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::BoolParsingFailed(raw).into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_interaction_endpoints() {
        let config = Config::with_defaults("https://issuer.example.com/");
        assert_eq!(
            config.login_endpoint,
            "https://issuer.example.com/interaction/login"
        );
        assert_eq!(
            config.consent_endpoint,
            "https://issuer.example.com/interaction/consent"
        );
        assert_eq!(config.authorize_code_lifespan, Duration::minutes(10));
        assert!(!config.allow_unsigned_request_objects);
    }
}
