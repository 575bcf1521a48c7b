use crate::error::{LedgerError, Result};
use crate::infrastructure::postgres::RetryPolicy;
use clap::Args;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

/// Database connection settings shared by every command that talks to
/// PostgreSQL.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// How many times to ping the database before giving up at startup.
    #[arg(long, default_value_t = 10)]
    pub connect_attempts: u32,

    /// Seconds to wait between connection attempts.
    #[arg(long, default_value_t = 2)]
    pub connect_interval_secs: u64,
}

impl DatabaseArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            interval: Duration::from_secs(self.connect_interval_secs),
        }
    }

    /// The configured database URL, if any non-empty one was given.
    pub fn url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// The database URL, or a fatal configuration error when it is missing.
    pub fn require_url(&self) -> Result<&str> {
        self.url().ok_or_else(|| {
            LedgerError::Config("required environment variable DATABASE_URL is missing".to_string())
        })
    }
}
