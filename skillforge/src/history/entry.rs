//! History entry model.

use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::GenerationSession;
use crate::stream::{Assessment, RiskLevel};

/// Name used when the artifact's frontmatter has no `name:` line.
pub const DEFAULT_SKILL_NAME: &str = "my-skill";

static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^name:\s*(.+)$").expect("name pattern is valid"));

/// Extract the skill name from the artifact's `name:` frontmatter line.
pub fn skill_name(artifact: &str) -> String {
    NAME_LINE
        .captures(artifact)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|name| !name.is_empty())
        .map_or_else(|| DEFAULT_SKILL_NAME.to_string(), String::from)
}

/// A completed generation, as stored in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique identifier (`UUIDv7`).
    pub id: String,
    /// The description the user submitted.
    pub description: String,
    pub skill_name: String,
    /// The generated artifact.
    pub skill_md: String,
    pub scan_score: u8,
    pub risk_level: RiskLevel,
    pub scan_result: Option<Assessment>,
    /// Creation time, stored as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// A history entry before it is assigned an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub description: String,
    pub skill_name: String,
    pub skill_md: String,
    pub scan_score: u8,
    pub risk_level: RiskLevel,
    pub scan_result: Option<Assessment>,
}

impl EntryDraft {
    /// Snapshot a finished session. Returns `None` unless the session is
    /// done with a non-empty artifact.
    pub fn from_session(description: &str, session: &GenerationSession) -> Option<Self> {
        if !session.is_committable() {
            return None;
        }
        let skill_md = session.final_artifact()?.to_string();
        let assessment = session.assessment().cloned();

        Some(Self {
            description: description.to_string(),
            skill_name: skill_name(&skill_md),
            scan_score: assessment.as_ref().map_or(0, |a| a.score),
            risk_level: assessment
                .as_ref()
                .map_or(RiskLevel::Unknown, |a| a.risk_level),
            scan_result: assessment,
            skill_md,
        })
    }

    /// Stamp the draft with a fresh id and the current time.
    pub fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::now_v7().to_string(),
            description: self.description,
            skill_name: self.skill_name,
            skill_md: self.skill_md,
            scan_score: self.scan_score,
            risk_level: self.risk_level,
            scan_result: self.scan_result,
            // Millisecond precision so a persisted entry reloads unchanged.
            created_at: Utc::now().trunc_subsecs(3),
        }
    }
}
