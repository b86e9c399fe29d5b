//! Engine configuration.
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Database configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection URL
    pub database_url: String,

    /// Minimum pool connections kept warm (default: 5)
    pub min_connections: u32,

    /// Maximum pool connections (default: 20)
    pub max_connections: u32,

    /// Pool acquire timeout in seconds (default: 5)
    pub acquire_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            acquire_timeout_secs: env::var("DB_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        })
    }
}
