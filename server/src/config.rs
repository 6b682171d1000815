//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; without it state goes to `state_file`
    pub database_url: Option<String>,
    /// Upper bound for the PostgreSQL pool
    pub database_max_connections: u32,
    /// JSON state file used when no database is configured
    pub state_file: PathBuf,
    /// Bearer token clients must present, if set
    pub auth_secret: Option<String>,
    /// Run incremental passes on provider notifications
    pub realtime_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 5,
            state_file: PathBuf::from("calsync-state.json"),
            auth_secret: None,
            realtime_enabled: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let database_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    name: "DATABASE_MAX_CONNECTIONS",
                    value,
                })?,
            Err(_) => defaults.database_max_connections,
        };

        let state_file = env::var("STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_file);

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let realtime_enabled = match env::var("REALTIME_ENABLED") {
            Ok(value) => parse_bool("REALTIME_ENABLED", &value)?,
            Err(_) => defaults.realtime_enabled,
        };

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            state_file,
            auth_secret,
            realtime_enabled,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: value.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid number for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Invalid boolean for {name}: {value}")]
    InvalidBool { name: &'static str, value: String },
}
