use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use tracing::{info, warn};

pub const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub max_connections: u32,
    pub upload_limit_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            port: try_load("PORTAL_PORT", "8080")?,
            max_connections: try_load("PORTAL_MAX_CONNECTIONS", "5")?,
            upload_limit_bytes: try_load(
                "PORTAL_UPLOAD_LIMIT_BYTES",
                &DEFAULT_UPLOAD_LIMIT_BYTES.to_string(),
            )?,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            port: 8080,
            max_connections: 5,
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT_BYTES,
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow::anyhow!("invalid value for {key}: {e}")
    })
}
