use std::{env, fmt, time::Duration};

use url::Url;

pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 60_000;

pub const ENV_URL: &str = "AC_CONSOLE_URL";
pub const ENV_POLL_MS: &str = "AC_CONSOLE_POLL_MS";
pub const ENV_RPC_TIMEOUT_MS: &str = "AC_CONSOLE_RPC_TIMEOUT_MS";
pub const ENV_DEBUG_IDLE_TIMEOUT_MS: &str = "AC_CONSOLE_DEBUG_IDLE_TIMEOUT_MS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub module: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// `0` disables the forced completion of runs that never report an end.
    pub debug_idle_timeout_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1".to_string(),
            module: rpc_abi::MODULE_NAME.to_string(),
            poll_interval_ms: 1_000,
            request_timeout_ms: 5_000,
            debug_idle_timeout_ms: 300_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    EmptyValue { key: String },
    InvalidNumber { key: String, value: String },
    InvalidUrl { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyValue { key } => write!(f, "{key} cannot be empty"),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer, got: {value}")
            }
            ConfigError::InvalidUrl { key, value } => {
                write!(f, "{key} must be an http(s) url, got: {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_URL) {
            config.set_base_url(ENV_URL, &url)?;
        }
        if let Some(value) = lookup(ENV_POLL_MS) {
            config.poll_interval_ms = parse_ms(ENV_POLL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_RPC_TIMEOUT_MS) {
            config.request_timeout_ms = parse_ms(ENV_RPC_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_DEBUG_IDLE_TIMEOUT_MS) {
            config.debug_idle_timeout_ms = parse_ms(ENV_DEBUG_IDLE_TIMEOUT_MS, &value)?;
        }
        Ok(config)
    }

    pub fn set_base_url(&mut self, key: &str, url: &str) -> Result<(), ConfigError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyValue {
                key: key.to_string(),
            });
        }
        let valid = Url::parse(trimmed)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
        if !valid {
            return Err(ConfigError::InvalidUrl {
                key: key.to_string(),
                value: trimmed.to_string(),
            });
        }
        self.base_url = trimmed.to_string();
        Ok(())
    }

    pub fn normalized_base_url(&self) -> String {
        normalize_base_url(&self.base_url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(sanitize_interval(self.poll_interval_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(sanitize_interval(self.request_timeout_ms))
    }

    pub fn debug_idle_timeout(&self) -> Option<Duration> {
        (self.debug_idle_timeout_ms > 0).then(|| Duration::from_millis(self.debug_idle_timeout_ms))
    }
}

pub fn parse_ms(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}

pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub fn sanitize_interval(value: u64) -> u64 {
    value.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}
