use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::HeaderValue;
use thiserror::Error;

use parley_gateway::SenderPolicy;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PARLEY_JWT_SECRET is unset or still a placeholder")]
    InsecureSecret,

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Which browser origins may call the HTTP API.
#[derive(Debug, Clone)]
pub enum CorsOrigin {
    Any,
    Exact(HeaderValue),
}

/// Server configuration, loaded from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub cors_origin: CorsOrigin,
    pub sender_policy: SenderPolicy,
    /// Browser client bundle served for unmatched paths, if set.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::InsecureSecret);
        }

        let port = match var("PARLEY_PORT") {
            Some(raw) => raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                var: "PARLEY_PORT",
                reason: e.to_string(),
            })?,
            None => 9000,
        };

        let cors_origin = match var("PARLEY_CORS_ORIGIN").as_deref() {
            Some("*") => CorsOrigin::Any,
            other => {
                let origin = other.unwrap_or("http://localhost:3000");
                let value = HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                    var: "PARLEY_CORS_ORIGIN",
                    reason: e.to_string(),
                })?;
                CorsOrigin::Exact(value)
            }
        };

        let sender_policy = match var("PARLEY_SENDER_POLICY") {
            Some(raw) => raw.parse().map_err(|e: parley_gateway::ingest::UnknownSenderPolicy| {
                ConfigError::Invalid {
                    var: "PARLEY_SENDER_POLICY",
                    reason: e.to_string(),
                }
            })?,
            None => SenderPolicy::default(),
        };

        Ok(Self {
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            cors_origin,
            sender_policy,
            static_dir: var("PARLEY_STATIC_DIR").map(PathBuf::from),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "PARLEY_HOST",
                reason: e.to_string(),
            })
    }
}
