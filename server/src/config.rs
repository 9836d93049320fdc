//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// SQLite connection URL, e.g. `sqlite://offsync.db` or `sqlite::memory:`
    pub database_url: String,
    /// Bearer token every request must carry. `None` allows anonymous access.
    pub auth_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
        })
    }

    /// In-memory database, anonymous access. Used by tests.
    pub fn in_memory() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            auth_secret: None,
        }
    }

    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,
}
