//! Configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::history::HISTORY_FILE;

/// Peer address used when none is configured.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the generation service, without a trailing slash.
    pub api_base: String,
    /// Location of the history file.
    pub history_path: PathBuf,
    /// Connect timeout for HTTP requests.
    pub connect_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base = lookup("SKILLFORGE_API_BASE")
            .map(|raw| normalize_api_base(&raw))
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = validate_api_base(&api_base)
            .map_err(|e| ConfigError::InvalidValue("SKILLFORGE_API_BASE".to_string(), e))?;

        let history_path = match lookup("SKILLFORGE_HISTORY_PATH").filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path.trim()),
            None => dirs::data_dir()
                .map(|dir| dir.join("skillforge").join(HISTORY_FILE))
                .ok_or_else(|| {
                    ConfigError::MissingVar(
                        "SKILLFORGE_HISTORY_PATH (no user data directory available)".to_string(),
                    )
                })?,
        };

        let connect_timeout = match lookup("SKILLFORGE_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "SKILLFORGE_TIMEOUT_SECS".to_string(),
                        format!("'{raw}' is not a positive number of seconds"),
                    )
                })?,
            None => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self {
            api_base,
            history_path,
            connect_timeout,
        })
    }

    /// Apply command-line overrides.
    pub fn with_overrides(
        mut self,
        api_base: Option<&str>,
        history_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if let Some(base) = api_base {
            self.api_base = validate_api_base(&normalize_api_base(base))
                .map_err(|e| ConfigError::InvalidValue("--api-base".to_string(), e))?;
        }
        if let Some(path) = history_path {
            self.history_path = path;
        }
        Ok(self)
    }
}

/// Trim whitespace and strip one pair of matching surrounding quotes.
pub fn normalize_api_base(value: &str) -> String {
    let trimmed = value.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn validate_api_base(base: &str) -> Result<String, String> {
    let url = Url::parse(base).map_err(|e| format!("'{base}' is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("'{base}' must use http or https"));
    }
    Ok(base.trim_end_matches('/').to_string())
}
