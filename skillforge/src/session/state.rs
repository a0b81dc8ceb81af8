//! Generation session state.

use serde::{Deserialize, Serialize};

use crate::stream::Assessment;

/// Phase of a generation session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No session has started, or it was reset.
    #[default]
    Idle,
    /// Tokens are being produced.
    Generating,
    /// The peer is checking the artifact format.
    Validating,
    /// The peer is running the risk scan.
    Scanning,
    /// A terminal success record was received.
    Done,
    /// The peer declared the session failed.
    Error,
}

impl Phase {
    /// Convert phase to its wire string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Scanning => "scanning",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one generation attempt.
///
/// Fields are only mutated through the controller and the interpreter; the
/// rest of the program reads them through the accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSession {
    pub(crate) phase: Phase,
    pub(crate) accumulated_text: String,
    pub(crate) final_artifact: Option<String>,
    pub(crate) assessment: Option<Assessment>,
    pub(crate) last_error: Option<String>,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state for a session entering `generating`.
    pub(crate) fn begin() -> Self {
        Self {
            phase: Phase::Generating,
            ..Self::default()
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Text streamed so far by `token` records.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// The complete artifact, set by the `done` record.
    pub fn final_artifact(&self) -> Option<&str> {
        self.final_artifact.as_deref()
    }

    pub const fn assessment(&self) -> Option<&Assessment> {
        self.assessment.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Best available artifact text: the final artifact if present and
    /// non-empty, else the streamed text.
    pub fn display_text(&self) -> &str {
        match self.final_artifact.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => &self.accumulated_text,
        }
    }

    /// Whether the session reached `done` with something worth keeping.
    pub fn is_committable(&self) -> bool {
        self.phase == Phase::Done && self.final_artifact.as_deref().is_some_and(|a| !a.is_empty())
    }
}
