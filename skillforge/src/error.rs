//! Failures surfaced by a generation request.

use reqwest::StatusCode;
use serde::Deserialize;

/// Transport and peer failures. The display string is what a session
/// records as its last error.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The peer could not be reached at all.
    #[error("Cannot reach the backend server. Make sure it is running on {base}")]
    Unreachable { base: String },

    /// The peer answered with a non-success status.
    #[error("{}", http_message(.status, .detail))]
    Http {
        status: StatusCode,
        detail: Option<String>,
    },

    /// Any other transport failure, passed through verbatim.
    #[error("{0}")]
    Transport(String),

    /// The request was canceled by the caller. Never recorded as an error.
    #[error("request canceled")]
    Canceled,
}

fn http_message(status: &StatusCode, detail: &Option<String>) -> String {
    detail
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

impl GenerateError {
    /// Classify a reqwest failure for a request against `base`.
    pub fn from_reqwest(err: &reqwest::Error, base: &str) -> Self {
        if err.is_connect() {
            Self::Unreachable {
                base: base.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// Build the error for a non-success response from its status and raw body.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            detail: Option<serde_json::Value>,
        }

        let detail = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.detail)
            .and_then(|d| match d {
                serde_json::Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            });

        Self::Http { status, detail }
    }

    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
