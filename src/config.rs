use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use anyhow::{Context, Result};

use crate::store::RetryPolicy;

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// The public origin attendees reach; session links are built on it.
    pub public_base_url: String,
    /// How long a session accepts submissions, in seconds.
    pub session_validity_secs: i64,
    /// The maximum number of pooled database connections.
    pub db_pool_max_size: usize,
    /// Total attempts for a transaction hitting transient failures.
    pub tx_max_attempts: u32,
    /// Attendance submissions allowed per client IP per window.
    pub submit_rate_limit: u32,
    /// The rate limit window in seconds.
    pub rate_limit_window_secs: u64,
    /// How often overdue sessions are swept, in seconds.
    pub sweep_interval_secs: u64,
    /// Whether cookies are marked `Secure`.
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            public_base_url: "http://127.0.0.1:3000".to_string(),
            session_validity_secs: 300,
            db_pool_max_size: 32,
            tx_max_attempts: 5,
            submit_rate_limit: 30,
            rate_limit_window_secs: 60,
            sweep_interval_secs: 60,
            secure_cookies: false,
        }
    }
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let session_validity_secs: i64 =
            parsed_or("SESSION_VALIDITY_SECS", defaults.session_validity_secs)?;
        if session_validity_secs <= 0 {
            anyhow::bail!("SESSION_VALIDITY_SECS must be positive");
        }

        let tx_max_attempts: u32 = parsed_or("TX_MAX_ATTEMPTS", defaults.tx_max_attempts)?;
        if tx_max_attempts == 0 {
            anyhow::bail!("TX_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            bind_addr: parsed_or("BIND_ADDR", defaults.bind_addr)?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url)
                .trim_end_matches('/')
                .to_string(),
            session_validity_secs,
            db_pool_max_size: parsed_or("DB_POOL_MAX_SIZE", defaults.db_pool_max_size)?,
            tx_max_attempts,
            submit_rate_limit: parsed_or("SUBMIT_RATE_LIMIT", defaults.submit_rate_limit)?,
            rate_limit_window_secs: parsed_or(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            )?,
            sweep_interval_secs: parsed_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            secure_cookies: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string())
                == "production",
        })
    }

    /// The session validity window.
    pub fn session_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_validity_secs)
    }

    /// The retry budget handed to the store.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.tx_max_attempts,
            ..RetryPolicy::default()
        }
    }
}
