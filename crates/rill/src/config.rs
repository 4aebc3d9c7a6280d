//! # Process Configuration
//!
//! Read once from the environment at startup.

use std::fmt;
use std::path::PathBuf;

use crate::model::Endpoint;

pub const LISTEN_ADDRESS_VAR: &str = "CONCORD_client_listen_address";
pub const PROXY_ADDRESS_VAR: &str = "CONCORD_client_proxy_address";
pub const LOG_FILE_VAR: &str = "RILL_LOG_FILE";
pub const LOG_LEVEL_VAR: &str = "RILL_LOG_LEVEL";
pub const LOG_MAX_BYTES_VAR: &str = "RILL_LOG_MAX_BYTES";
pub const LOG_BACKUPS_VAR: &str = "RILL_LOG_BACKUPS";

pub const DEFAULT_LOG_FILE: &str = "rill.log";
pub const DEFAULT_LOG_LEVEL: &str = "debug";
pub const DEFAULT_LOG_MAX_BYTES: u64 = 512_000_000;
pub const DEFAULT_LOG_BACKUPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Malformed { var: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(var) => write!(f, "{} is not set", var),
            Self::Malformed { var, value, reason } => {
                write!(f, "{}='{}' is invalid: {}", var, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub path: PathBuf,
    /// A tracing filter directive, e.g. `info` or `rill=debug,warn`.
    pub level: String,
    /// Size at which the file is rotated. Zero disables rotation.
    pub max_bytes: u64,
    /// Rotated files kept alongside the live one.
    pub backups: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_FILE),
            level: DEFAULT_LOG_LEVEL.to_owned(),
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the adapter listens, and the address it advertises. Never a
    /// wildcard when read from the environment.
    pub listen: Endpoint,
    pub proxy: Endpoint,
    pub log: LogConfig,
}

impl Config {
    pub fn new(listen: Endpoint, proxy: Endpoint) -> Self {
        Self { listen, proxy, log: LogConfig::default() }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen = endpoint(&lookup, LISTEN_ADDRESS_VAR)?;
        // The listen address is also what the proxy is told to dial.
        if listen.is_wildcard() {
            return Err(ConfigError::Malformed {
                var: LISTEN_ADDRESS_VAR,
                value: listen.to_string(),
                reason: "must be an address the proxy can reach, not a wildcard".into(),
            });
        }
        let proxy = endpoint(&lookup, PROXY_ADDRESS_VAR)?;

        let mut log = LogConfig::default();
        if let Some(path) = lookup(LOG_FILE_VAR) {
            log.path = PathBuf::from(path);
        }
        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            log.level = level;
        }
        if let Some(raw) = lookup(LOG_MAX_BYTES_VAR) {
            log.max_bytes = parse_number(LOG_MAX_BYTES_VAR, raw)?;
        }
        if let Some(raw) = lookup(LOG_BACKUPS_VAR) {
            log.backups = parse_number(LOG_BACKUPS_VAR, raw)?;
        }

        Ok(Self { listen, proxy, log })
    }
}

fn endpoint(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Endpoint, ConfigError> {
    let raw = lookup(var).ok_or(ConfigError::Missing(var))?;
    raw.parse()
        .map_err(|reason| ConfigError::Malformed { var, value: raw.clone(), reason })
}

fn parse_number<T>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Malformed { var, reason: e.to_string(), value: raw })
}
