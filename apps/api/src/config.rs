use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: u16,
    pub rust_log: String,
    pub request_timeout_secs: u64,
    pub inactivity_timeout_minutes: i64,
    pub heartbeat_interval_secs: u64,
    /// Explicit sweep cadence. `None` derives it from the inactivity timeout.
    pub sweep_interval_secs: Option<u64>,
    pub sweep_task_timeout_secs: u64,
    pub switch_baseline_cost_minutes: i32,
    /// Extra recovery minutes per focus-difficulty step. 0 keeps the flat baseline.
    pub switch_cost_per_difficulty_step: i32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30)?,
            inactivity_timeout_minutes: env_or("INACTIVITY_TIMEOUT_MINUTES", 15)?,
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 60)?,
            sweep_interval_secs: optional_env("SWEEP_INTERVAL_SECS")?,
            sweep_task_timeout_secs: env_or("SWEEP_TASK_TIMEOUT_SECS", 10)?,
            switch_baseline_cost_minutes: env_or("SWITCH_BASELINE_COST_MINUTES", 23)?,
            switch_cost_per_difficulty_step: env_or("SWITCH_COST_PER_DIFFICULTY_STEP", 0)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(optional_env(key)?.unwrap_or(default))
}
