use std::{env, str::FromStr, time::Duration};
use crate::error::{AppErr, AppResult};

/// Runtime settings, read once from the environment at boot.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url:     String,
    pub jwt_secret:       String,
    pub bind_addr:        String,
    pub resolver_url:     Option<String>,
    pub resolver_timeout: Duration,
    pub drift_interval:   Duration,
    pub token_ttl:        Duration,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://watchroom.db?mode=rwc".into()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AppErr::Config("JWT_SECRET is not set".into()))?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            resolver_url: env::var("RESOLVER_URL").ok().filter(|s| !s.trim().is_empty()),
            resolver_timeout: Duration::from_millis(num("RESOLVER_TIMEOUT_MS", 4_000)?),
            drift_interval:   Duration::from_secs(num("DRIFT_INTERVAL_SECS", 2)?.max(1)),
            token_ttl:        Duration::from_secs(num("TOKEN_TTL_SECS", 86_400)?),
        })
    }

    /// Settings for unit tests: no resolver, short timeouts.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url:     "sqlite::memory:".into(),
            jwt_secret:       "test-secret".into(),
            bind_addr:        "127.0.0.1:0".into(),
            resolver_url:     None,
            resolver_timeout: Duration::from_millis(100),
            drift_interval:   Duration::from_secs(1),
            token_ttl:        Duration::from_secs(3_600),
        }
    }
}

fn num<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppErr::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
