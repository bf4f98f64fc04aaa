//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use crate::errors::{Result, TrackerError};

/// Which remote persistence backend the sync worker writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBackend {
    /// Local SQLite database via sqlx (default).
    Sqlite,
    /// PostgREST-style HTTP API.
    Rest,
    /// In-process store; nothing survives a restart.
    Memory,
}

impl RemoteBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "rest" => Ok(Self::Rest),
            "memory" => Ok(Self::Memory),
            other => Err(TrackerError::Config(format!(
                "Invalid REMOTE_BACKEND: {other} (expected sqlite, rest or memory)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database used by the `sqlite` remote backend
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Seconds between two scheduler ticks
    pub step_duration_secs: u64,
    /// Seconds a completed journey stays in the active set
    pub grace_period_secs: u64,
    /// Snapshot file for the local durable cache (`None` disables it)
    pub cache_path: Option<PathBuf>,
    pub remote_backend: RemoteBackend,
    /// Base URL of the REST backend (e.g. https://project.example.co/rest/v1)
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:./trupath.db".to_string(),
            api_port: 3001,
            step_duration_secs: 5,
            grace_period_secs: 30,
            cache_path: Some(PathBuf::from("./trupath-cache.json")),
            remote_backend: RemoteBackend::Sqlite,
            remote_url: None,
            remote_api_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let remote_backend = RemoteBackend::parse(
            &env_var("REMOTE_BACKEND").unwrap_or_else(|_| "sqlite".to_string()),
        )?;
        let remote_url = env_var("REMOTE_URL").ok();
        let remote_api_key = env_var("REMOTE_API_KEY").ok();

        if remote_backend == RemoteBackend::Rest && (remote_url.is_none() || remote_api_key.is_none())
        {
            return Err(TrackerError::Config(
                "REMOTE_URL and REMOTE_API_KEY are required when REMOTE_BACKEND=rest".to_string(),
            ));
        }

        let step_duration_secs: u64 = env_var("STEP_DURATION_SECS")
            .unwrap_or_else(|_| defaults.step_duration_secs.to_string())
            .parse()
            .map_err(|_| TrackerError::Config("Invalid STEP_DURATION_SECS".to_string()))?;
        if step_duration_secs == 0 {
            return Err(TrackerError::Config(
                "STEP_DURATION_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| defaults.api_port.to_string())
                .parse()
                .map_err(|_| TrackerError::Config("Invalid API_PORT".to_string()))?,
            step_duration_secs,
            grace_period_secs: env_var("GRACE_PERIOD_SECS")
                .unwrap_or_else(|_| defaults.grace_period_secs.to_string())
                .parse()
                .map_err(|_| TrackerError::Config("Invalid GRACE_PERIOD_SECS".to_string()))?,
            cache_path: match env_var("CACHE_PATH") {
                Ok(path) if path.trim().is_empty() => None,
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => defaults.cache_path,
            },
            remote_backend,
            remote_url,
            remote_api_key,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| TrackerError::Config(format!("Missing env var: {key}")))
}
