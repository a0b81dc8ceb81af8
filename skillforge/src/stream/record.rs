//! Wire records carried by the generation stream.
//!
//! Each `data: ` frame holds one JSON object tagged by `type`. Records the
//! client does not understand fail to deserialize and are dropped by the
//! interpreter, so the enum stays closed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::Phase;

/// Severity of a single scan finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    /// Severity the client does not recognize.
    #[serde(other)]
    Unknown,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall risk level reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
    /// Risk level the client does not recognize.
    #[serde(other)]
    Unknown,
}

impl RiskLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One finding from the risk scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    /// 1-based line in the artifact, when the finding is line-bound.
    #[serde(default)]
    pub line: Option<u32>,
}

/// Risk-scan result attached to a finished generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// 0 (worst) to 100 (clean).
    pub score: u8,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Finding count per severity, as reported by the scanner.
    #[serde(default)]
    pub summary: BTreeMap<String, u32>,
    #[serde(default)]
    pub disclaimer: String,
}

/// A parsed stream record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    /// Phase transition announced by the peer.
    Phase { phase: Phase },
    /// Incremental artifact text.
    Token { content: String },
    /// Outcome of the peer's format validation.
    Validation {
        valid: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        retrying: bool,
    },
    /// Risk assessment of the artifact.
    ScanResult { results: Assessment },
    /// Terminal success with the complete artifact.
    Done {
        #[serde(default)]
        skill_md: Option<String>,
    },
    /// Peer-reported failure.
    Error {
        #[serde(default)]
        content: Option<String>,
    },
}

impl StreamRecord {
    /// Parse a frame payload. Returns `None` for anything that is not a
    /// well-formed record.
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload.is_empty() {
            return None;
        }
        serde_json::from_str(payload).ok()
    }

    /// The `type` tag, for logging.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::Token { .. } => "token",
            Self::Validation { .. } => "validation",
            Self::ScanResult { .. } => "scan_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
