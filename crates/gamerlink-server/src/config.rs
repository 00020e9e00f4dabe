use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets shipped in sample `.env` files.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

const DEFAULT_TOKEN_TTL_MINUTES: i64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset and empty values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("GAMERLINK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("GAMERLINK_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("GAMERLINK_PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("invalid GAMERLINK_PORT {raw:?}"))?,
            None => 8000,
        };

        let ttl_minutes = match get("GAMERLINK_TOKEN_TTL_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|m| *m > 0)
                .with_context(|| format!("invalid GAMERLINK_TOKEN_TTL_MINUTES {raw:?}"))?,
            None => DEFAULT_TOKEN_TTL_MINUTES,
        };

        Ok(Self {
            host: get("GAMERLINK_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("GAMERLINK_DB_PATH").unwrap_or_else(|| "gamerlink.db".into())),
            jwt_secret,
            token_ttl: chrono::Duration::minutes(ttl_minutes),
            static_dir: get("GAMERLINK_STATIC_DIR").map(PathBuf::from),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
