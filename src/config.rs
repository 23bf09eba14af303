use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TOKEN_CACHE: &str = "/cache/tesla_token.json";
const DEFAULT_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_WAREHOUSE_SCHEMA: &str = "public";

#[derive(Clone, Debug)]
pub struct Config {
    pub account_email: Option<String>,
    pub token_cache_path: PathBuf,
    pub interval_seconds: u64,
    pub warehouse_url: Option<String>,
    pub warehouse_schema: String,
}

impl Config {
    /// Reads the process environment (and a .env file when present). Values a
    /// component requires stay optional here and fail inside that component on
    /// first use, not at startup.
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            account_email: env_optional_string("TESLA_EMAIL"),
            token_cache_path: env_path("TESLA_CACHE", DEFAULT_TOKEN_CACHE),
            interval_seconds: env_u64("INTERVAL_SECONDS", DEFAULT_INTERVAL_SECONDS),
            warehouse_url: env_optional_string("WAREHOUSE_DATABASE_URL"),
            warehouse_schema: env_string("WAREHOUSE_SCHEMA", DEFAULT_WAREHOUSE_SCHEMA),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env_optional_string(key).unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env_optional_string(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
