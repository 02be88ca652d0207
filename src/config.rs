use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub engine_url: String,
    pub engine_timeout: Duration,
    pub autotune_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match env_optional(&lookup, "REPLAY_DATABASE_URL") {
            Some(url) => url,
            None => env_string(&lookup, "DATABASE_URL", None)?,
        };
        let db_max_connections = env_u32(&lookup, "REPLAY_DB_MAX_CONNECTIONS", Some(5))?;

        let engine_url = env_string(
            &lookup,
            "REPLAY_ENGINE_URL",
            Some("http://127.0.0.1:1426".to_string()),
        )?;
        // Replays of long windows legitimately run for hours.
        let engine_timeout = Duration::from_secs(env_u64(
            &lookup,
            "REPLAY_ENGINE_TIMEOUT_SECONDS",
            Some(6 * 3600),
        )?);

        let autotune_max_attempts = env_u32(&lookup, "REPLAY_AUTOTUNE_MAX_ATTEMPTS", Some(5))?;

        Ok(Self {
            database_url,
            db_max_connections,
            engine_url,
            engine_timeout,
            autotune_max_attempts,
        })
    }
}

fn env_string<F>(lookup: &F, key: &str, default: Option<String>) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => Ok(value.trim().to_string()),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64<F>(lookup: &F, key: &str, default: Option<u64>) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u32<F>(lookup: &F, key: &str, default: Option<u32>) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let value = env_u64(lookup, key, default.map(u64::from))?;
    u32::try_from(value).with_context(|| format!("{key} out of range: {value}"))
}

fn env_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
