//! Runtime configuration from the environment.
//!
//! The server address and API token are deployment concerns, never part
//! of the setup document. `dotenvy` is loaded by the binary before this
//! is read, so a local `.env` works the same as real environment
//! variables.

use std::env;

use thiserror::Error;

pub const ENV_SERVER: &str = "CHIRPSTACK_SERVER";
pub const ENV_API_TOKEN: &str = "CHIRPSTACK_API_TOKEN";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
}

/// Connection settings for the management API.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the management API, e.g. `http://localhost:8090`.
    pub server: String,
    /// Bearer token presented on every call.
    pub api_token: String,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            server: env::var(ENV_SERVER).map_err(|_| SettingsError::Missing(ENV_SERVER))?,
            api_token: env::var(ENV_API_TOKEN)
                .map_err(|_| SettingsError::Missing(ENV_API_TOKEN))?,
            log_level: env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string()),
        })
    }
}
