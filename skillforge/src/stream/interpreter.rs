//! Applies stream records to a generation session.

use tracing::{debug, warn};

use super::record::{Assessment, StreamRecord};
use crate::session::{GenerationSession, Phase};

/// Observable change produced by applying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Phase(Phase),
    Token(String),
    Validation {
        valid: bool,
        retrying: bool,
        error: Option<String>,
    },
    Assessment(Assessment),
    Artifact(String),
    Error(String),
}

/// Parse one frame payload and apply it.
///
/// Malformed payloads are dropped and leave the session untouched.
pub fn apply_frame(session: &mut GenerationSession, payload: &str) -> Option<SessionUpdate> {
    let Some(record) = StreamRecord::parse(payload) else {
        warn!(len = payload.len(), "dropping malformed stream frame");
        return None;
    };
    Some(apply(session, record))
}

/// Apply one record to the session.
pub fn apply(session: &mut GenerationSession, record: StreamRecord) -> SessionUpdate {
    debug!(tag = record.tag(), phase = %session.phase, "applying record");

    match record {
        StreamRecord::Phase { phase } => {
            session.phase = phase;
            SessionUpdate::Phase(phase)
        }
        StreamRecord::Token { content } => {
            session.accumulated_text.push_str(&content);
            SessionUpdate::Token(content)
        }
        StreamRecord::Validation {
            valid,
            error,
            retrying,
        } => {
            if !valid && !retrying {
                session.last_error = Some(validation_message(error.as_deref()));
            }
            SessionUpdate::Validation {
                valid,
                retrying,
                error,
            }
        }
        StreamRecord::ScanResult { results } => {
            session.assessment = Some(results.clone());
            session.phase = Phase::Done;
            SessionUpdate::Assessment(results)
        }
        StreamRecord::Done { skill_md } => {
            let artifact = skill_md.unwrap_or_default();
            session.phase = Phase::Done;
            match &session.final_artifact {
                // The artifact is written once; repeated `done` records keep the first.
                Some(existing) => {
                    if *existing != artifact {
                        warn!("ignoring conflicting artifact from repeated done record");
                    }
                    SessionUpdate::Artifact(existing.clone())
                }
                None => {
                    session.final_artifact = Some(artifact.clone());
                    SessionUpdate::Artifact(artifact)
                }
            }
        }
        StreamRecord::Error { content } => {
            let message =
                content.unwrap_or_else(|| "The generation service reported an error".to_string());
            session.last_error = Some(message.clone());
            SessionUpdate::Error(message)
        }
    }
}

fn validation_message(error: Option<&str>) -> String {
    match error {
        Some(detail) if !detail.is_empty() => format!("Validation failed: {detail}"),
        _ => "Validation failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(frames: &[&str]) -> GenerationSession {
        let mut session = GenerationSession::begin();
        for frame in frames {
            apply_frame(&mut session, frame);
        }
        session
    }

    #[test]
    fn tokens_concatenate_in_order() {
        let session = run(&[
            r#"{"type":"token","content":"a"}"#,
            r#"{"type":"token","content":"bc"}"#,
            r#"{"type":"token","content":""}"#,
            r#"{"type":"token","content":"d"}"#,
        ]);
        assert_eq!(session.accumulated_text(), "abcd");
        assert_eq!(session.phase(), Phase::Generating);
    }

    #[test]
    fn happy_path_scenario() {
        let session = run(&[
            r#"{"type":"phase","phase":"generating"}"#,
            r#"{"type":"token","content":"Hello"}"#,
            r#"{"type":"token","content":", world"}"#,
            r#"{"type":"done","skill_md":"Hello, world"}"#,
        ]);
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(session.accumulated_text(), "Hello, world");
        assert_eq!(session.final_artifact(), Some("Hello, world"));
        assert!(session.last_error().is_none());
    }

    #[test]
    fn corrupt_frame_is_invisible() {
        let valid_a = r#"{"type":"token","content":"x"}"#;
        let valid_b = r#"{"type":"done","skill_md":"x"}"#;
        let with_corrupt = run(&[valid_a, r#"{"type":"token","content":"#, valid_b]);
        let without = run(&[valid_a, valid_b]);
        assert_eq!(with_corrupt, without);
    }

    #[test]
    fn fatal_validation_sets_error_and_keeps_phase() {
        let session = run(&[
            r#"{"type":"phase","phase":"validating"}"#,
            r#"{"type":"validation","valid":false,"retrying":false,"error":"missing field X"}"#,
        ]);
        assert_eq!(session.phase(), Phase::Validating);
        assert!(session.last_error().unwrap().contains("missing field X"));
        assert!(session.final_artifact().is_none());
    }

    #[test]
    fn retrying_validation_is_not_an_error() {
        let session = run(&[
            r#"{"type":"validation","valid":false,"retrying":true,"error":"bad yaml"}"#,
            r#"{"type":"validation","valid":true,"error":null}"#,
        ]);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn validation_without_detail() {
        let session = run(&[r#"{"type":"validation","valid":false}"#]);
        assert_eq!(session.last_error(), Some("Validation failed"));
    }

    #[test]
    fn scan_result_forces_done() {
        let session = run(&[
            r#"{"type":"phase","phase":"scanning"}"#,
            r#"{"type":"scan_result","results":{"score":95,"risk_level":"safe","issues":[],"disclaimer":"advisory"}}"#,
        ]);
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(session.assessment().unwrap().score, 95);
    }

    #[test]
    fn terminal_records_are_idempotent() {
        let scan = r#"{"type":"scan_result","results":{"score":80,"risk_level":"medium","issues":[]}}"#;
        let done = r#"{"type":"done","skill_md":"body"}"#;
        let once = run(&[scan, done]);
        let twice = run(&[scan, done, done, scan]);
        assert_eq!(once, twice);

        let reversed = run(&[done, scan]);
        assert_eq!(reversed, once);
    }

    #[test]
    fn repeated_done_keeps_first_artifact() {
        let session = run(&[
            r#"{"type":"done","skill_md":"first"}"#,
            r#"{"type":"done","skill_md":"second"}"#,
        ]);
        assert_eq!(session.final_artifact(), Some("first"));
    }

    #[test]
    fn done_without_artifact_defaults_to_empty() {
        let session = run(&[r#"{"type":"done"}"#]);
        assert_eq!(session.final_artifact(), Some(""));
        assert_eq!(session.phase(), Phase::Done);
    }

    #[test]
    fn error_record_leaves_phase() {
        let session = run(&[
            r#"{"type":"phase","phase":"generating"}"#,
            r#"{"type":"error","content":"LLM generation failed: boom"}"#,
        ]);
        assert_eq!(session.phase(), Phase::Generating);
        assert_eq!(session.last_error(), Some("LLM generation failed: boom"));
    }

    #[test]
    fn updates_mirror_records() {
        let mut session = GenerationSession::begin();
        assert_eq!(
            apply_frame(&mut session, r#"{"type":"token","content":"hi"}"#),
            Some(SessionUpdate::Token("hi".to_string()))
        );
        assert_eq!(apply_frame(&mut session, "garbage"), None);
    }
}
