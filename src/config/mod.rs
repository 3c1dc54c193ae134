use std::env;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use thiserror::Error;

use crate::crypto::Decryptor;

/// Startup configuration failures. Each names the offending variable so the
/// abort diagnostic is precise; values are never echoed back.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Identity-provider settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub domain: String,
    pub algorithm: Algorithm,
    pub jwks_uri: String,
    pub audience: String,
}

/// Process-wide configuration, built once at startup and frozen. Reload
/// requires a restart.
#[derive(Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    /// Control-plane DSN. Secret; excluded from Debug output.
    pub database_url: String,
    /// URL-safe base64 of the 32-byte AES-256-GCM key. Secret.
    pub encryption_key: String,
    pub tenant_cache_ttl: Duration,
    pub api_path_prefix: String,
    pub port: u16,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("auth_domain", &self.auth.domain)
            .field("auth_algorithm", &self.auth.algorithm)
            .field("jwks_uri", &self.auth.jwks_uri)
            .field("audience", &self.auth.audience)
            .field("tenant_cache_ttl", &self.tenant_cache_ttl)
            .field("api_path_prefix", &self.api_path_prefix)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. `from_env` is the production
    /// entry point; tests inject a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let domain = require(&lookup, "AUTH_DOMAIN")?;

        let algorithm = match require(&lookup, "AUTH_ALGORITHM")?.as_str() {
            "RS256" => Algorithm::RS256,
            "ES256" => Algorithm::ES256,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "AUTH_ALGORITHM",
                    reason: "must be RS256 or ES256".to_string(),
                })
            }
        };

        let jwks_uri = lookup("AUTH_JWKS_URI")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("https://{domain}/.well-known/jwks.json"));

        let audience = require(&lookup, "AUTH_AUDIENCE")?;
        let database_url = require(&lookup, "DATABASE_URL")?;

        let encryption_key = require(&lookup, "ENCRYPTION_KEY")?;
        // Validate the key shape now so a bad deployment aborts at startup
        Decryptor::from_base64_key(&encryption_key).map_err(|e| ConfigError::Invalid {
            var: "ENCRYPTION_KEY",
            reason: e.to_string(),
        })?;

        let tenant_cache_ttl = match lookup("TENANT_CACHE_TTL_SECONDS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    var: "TENANT_CACHE_TTL_SECONDS",
                    reason: "must be an integer number of seconds".to_string(),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(300),
        };

        let api_path_prefix = lookup("API_PATH_PREFIX")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "/api/".to_string());

        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                reason: "must be a TCP port number".to_string(),
            })?,
            None => 3000,
        };

        Ok(Self {
            auth: AuthConfig {
                domain,
                algorithm,
                jwks_uri,
                audience,
            },
            database_url,
            encryption_key,
            tenant_cache_ttl,
            api_path_prefix,
            port,
        })
    }
}

fn require<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}
