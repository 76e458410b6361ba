//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use base64::{engine::general_purpose, Engine as _};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{SecretBox, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default audience of capability grants.
pub const DEFAULT_ACCOUNT_NAME: &str = "PNM";

/// Default root directory of recording outputs and their audit files.
pub const DEFAULT_RECORDING_FILES_PATH: &str = "/var/lib/room-controller/recordings";

/// Default provisioning attempts per category (no retry).
pub const DEFAULT_PROVISION_MAX_ATTEMPTS: u32 = 1;

/// Upper bound on provisioning attempts per category.
pub const MAX_PROVISION_ATTEMPTS: u32 = 5;

/// Default Postgres pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum length of the access-token HMAC secret.
pub const MIN_ACCESS_TOKEN_SECRET_BYTES: usize = 32;

/// Subject prefixes used when building grants and publishing room events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectsConfig {
    pub system_js_worker: String,
    pub chat: String,
    pub system_public: String,
    pub system_private: String,
    pub whiteboard: String,
    pub data_channel: String,
    pub room_events: String,
}

impl Default for SubjectsConfig {
    fn default() -> Self {
        Self {
            system_js_worker: "sysJsWorker".to_string(),
            chat: "chat".to_string(),
            system_public: "sysPublic".to_string(),
            system_private: "sysPrivate".to_string(),
            whiteboard: "whiteboard".to_string(),
            data_channel: "dataChannel".to_string(),
            room_events: "roomEvents".to_string(),
        }
    }
}

/// Room Controller configuration.
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Redis URL backing the KV namespaces, stream consumers and
    /// notifications.
    pub redis_url: String,

    /// HTTP bind address (default: "0.0.0.0:8090").
    pub bind_address: String,

    /// Ed25519 seed of the issuer key pair.
    pub issuer_seed: SecretBox<Vec<u8>>,

    /// Audience written into every capability grant.
    pub account_name: String,

    /// Expected `iss` of access tokens.
    pub access_token_api_key: String,

    /// HS256 secret of access tokens.
    pub access_token_secret: SecretString,

    /// Clock skew tolerance for `iat` checks.
    pub jwt_clock_skew: Duration,

    /// Root directory for recording outputs and audit files.
    pub recording_files_path: PathBuf,

    /// Attempts per category before provisioning gives up.
    pub provision_max_attempts: u32,

    pub db_max_connections: u32,

    pub subjects: SubjectsConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("issuer_seed", &"[REDACTED]")
            .field("account_name", &self.account_name)
            .field("access_token_api_key", &self.access_token_api_key)
            .field("access_token_secret", &"[REDACTED]")
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("recording_files_path", &self.recording_files_path)
            .field("provision_max_attempts", &self.provision_max_attempts)
            .field("db_max_connections", &self.db_max_connections)
            .field("subjects", &self.subjects)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer seed: {0}")]
    InvalidIssuerSeed(String),

    #[error("Invalid access token secret: {0}")]
    InvalidAccessTokenSecret(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid provisioning attempts configuration: {0}")]
    InvalidProvisionAttempts(String),

    #[error("Invalid database pool configuration: {0}")]
    InvalidDbMaxConnections(String),
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;
        let redis_url = required(vars, "REDIS_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let seed_b64 = required(vars, "RC_ISSUER_SEED")?;
        let issuer_seed = general_purpose::STANDARD.decode(seed_b64).map_err(|e| {
            ConfigError::InvalidIssuerSeed(format!("RC_ISSUER_SEED must be base64: {e}"))
        })?;
        if issuer_seed.len() != 32 {
            return Err(ConfigError::InvalidIssuerSeed(format!(
                "Expected 32 bytes, got {}",
                issuer_seed.len()
            )));
        }

        let account_name = vars
            .get("RC_ACCOUNT_NAME")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACCOUNT_NAME.to_string());

        let access_token_api_key = required(vars, "ACCESS_TOKEN_API_KEY")?;

        let access_token_secret = required(vars, "ACCESS_TOKEN_SECRET")?;
        if access_token_secret.len() < MIN_ACCESS_TOKEN_SECRET_BYTES {
            return Err(ConfigError::InvalidAccessTokenSecret(format!(
                "ACCESS_TOKEN_SECRET must be at least {MIN_ACCESS_TOKEN_SECRET_BYTES} bytes, got {}",
                access_token_secret.len()
            )));
        }

        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwtClockSkew(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got 0".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                    MAX_CLOCK_SKEW.as_secs()
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let recording_files_path = vars
            .get("RECORDING_FILES_PATH")
            .filter(|value| !value.is_empty())
            .map_or_else(
                || PathBuf::from(DEFAULT_RECORDING_FILES_PATH),
                PathBuf::from,
            );

        let provision_max_attempts = if let Some(value_str) = vars.get("PROVISION_MAX_ATTEMPTS") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidProvisionAttempts(format!(
                    "PROVISION_MAX_ATTEMPTS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 || value > MAX_PROVISION_ATTEMPTS {
                return Err(ConfigError::InvalidProvisionAttempts(format!(
                    "PROVISION_MAX_ATTEMPTS must be between 1 and {MAX_PROVISION_ATTEMPTS}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_PROVISION_MAX_ATTEMPTS
        };

        let db_max_connections = if let Some(value_str) = vars.get("DB_MAX_CONNECTIONS") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidDbMaxConnections(format!(
                    "DB_MAX_CONNECTIONS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidDbMaxConnections(
                    "DB_MAX_CONNECTIONS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_DB_MAX_CONNECTIONS
        };

        Ok(Config {
            database_url,
            redis_url,
            bind_address,
            issuer_seed: SecretBox::new(Box::new(issuer_seed)),
            account_name,
            access_token_api_key,
            access_token_secret: SecretString::from(access_token_secret),
            jwt_clock_skew,
            recording_files_path,
            provision_max_attempts,
            db_max_connections,
            subjects: SubjectsConfig::default(),
        })
    }
}
