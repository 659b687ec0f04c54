use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Where drafts and recovery backups live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// PostgreSQL for drafts, Redis for recovery backups.
    Postgres,
    /// Process memory for both; everything is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("STORAGE_BACKEND must be 'postgres' or 'memory', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub wizard_root: String,
    pub dashboard_path: String,
    pub finalize_path: String,
    /// Idle wizard sessions are dropped after this long.
    pub session_idle_ttl: Duration,
    pub max_live_sessions: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let storage_backend: StorageBackend = optional_env("STORAGE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()?;

        // Remote stores are only required when they are actually used.
        let (database_url, redis_url) = match storage_backend {
            StorageBackend::Postgres => (
                Some(require_env("DATABASE_URL")?),
                Some(require_env("REDIS_URL")?),
            ),
            StorageBackend::Memory => (None, None),
        };

        Ok(Config {
            storage_backend,
            database_url,
            redis_url,
            port: optional_env("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            wizard_root: path_env("WIZARD_ROOT", "/resume-builder")?,
            dashboard_path: path_env("DASHBOARD_PATH", "/dashboard")?,
            finalize_path: path_env("FINALIZE_PATH", "/export")?,
            session_idle_ttl: Duration::from_secs(
                optional_env("SESSION_IDLE_TTL_SECS")
                    .unwrap_or_else(|| "1800".to_string())
                    .parse::<u64>()
                    .context("SESSION_IDLE_TTL_SECS must be a number of seconds")?,
            ),
            max_live_sessions: optional_env("MAX_LIVE_SESSIONS")
                .unwrap_or_else(|| "10000".to_string())
                .parse::<usize>()
                .context("MAX_LIVE_SESSIONS must be a positive integer")?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn path_env(key: &str, default: &str) -> Result<String> {
    let value = optional_env(key).unwrap_or_else(|| default.to_string());
    if !value.starts_with('/') {
        bail!("{key} must be an absolute path, got '{value}'");
    }
    Ok(value)
}
