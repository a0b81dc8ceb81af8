//! Session controller.
//!
//! Issues the generation request, pipes the response body through the frame
//! decoder and the interpreter, and commits the finished session to history.
//! All session mutation happens on the task driving [`SessionController::start`];
//! other tasks can only cancel through a [`Canceller`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{GenerationSession, Phase};
use crate::api::{ApiClient, GenerateRequest};
use crate::error::GenerateError;
use crate::history::{EntryDraft, HistoryCache, HistoryEntry};
use crate::stream::{apply_frame, FrameDecoder, SessionUpdate};

type TokenSlot = Arc<Mutex<Option<CancellationToken>>>;

fn lock(slot: &TokenSlot) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a call to [`SessionController::start`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The description was empty; nothing was sent.
    Rejected,
    /// The body ended or a failure was recorded on the session.
    Finished,
    /// The session was canceled before the body ended.
    Cancelled,
}

/// Cloneable handle that cancels whichever session is in flight.
#[derive(Debug, Clone)]
pub struct Canceller {
    slot: TokenSlot,
}

impl Canceller {
    /// Cancel the active session, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Drives one generation session at a time.
pub struct SessionController {
    api: ApiClient,
    session: GenerationSession,
    description: String,
    committed: bool,
    committed_id: Option<String>,
    active: TokenSlot,
    history: Option<HistoryCache>,
    updates: Option<mpsc::UnboundedSender<SessionUpdate>>,
}

impl SessionController {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            session: GenerationSession::new(),
            description: String::new(),
            committed: false,
            committed_id: None,
            active: Arc::new(Mutex::new(None)),
            history: None,
            updates: None,
        }
    }

    /// Commit finished sessions to `history`.
    #[must_use]
    pub fn with_history(mut self, history: HistoryCache) -> Self {
        self.history = Some(history);
        self
    }

    /// Receive every change applied to the session from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates = Some(tx);
        rx
    }

    pub const fn session(&self) -> &GenerationSession {
        &self.session
    }

    pub const fn history(&self) -> Option<&HistoryCache> {
        self.history.as_ref()
    }

    /// The history entry recorded for the current session, if any.
    pub fn committed_entry(&self) -> Option<&HistoryEntry> {
        let id = self.committed_id.as_deref()?;
        self.history.as_ref()?.find(id)
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            slot: Arc::clone(&self.active),
        }
    }

    /// Whether a request is currently in flight.
    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Cancel the in-flight request, if any. Cancellation is not an error.
    pub fn cancel(&self) {
        if self.canceller().cancel() {
            info!("generation canceled");
        }
    }

    /// Return to `idle` with every field cleared. An in-flight request is
    /// left alone; cancel it first.
    pub fn reset(&mut self) {
        self.session = GenerationSession::new();
        self.description.clear();
        self.committed = false;
        self.committed_id = None;
        self.publish(SessionUpdate::Phase(Phase::Idle));
    }

    /// Run a generation session to completion, cancellation or failure.
    ///
    /// Failures never escape: they end up in the session's last error.
    pub async fn start(&mut self, description: &str, template_id: Option<&str>) -> SessionOutcome {
        let description = description.trim();
        if description.is_empty() {
            debug!("rejecting empty description");
            return SessionOutcome::Rejected;
        }
        let template_id = template_id.map(str::trim).filter(|t| !t.is_empty());

        let token = self.activate();
        self.session = GenerationSession::begin();
        self.description = description.to_string();
        self.committed = false;
        self.committed_id = None;
        self.publish(SessionUpdate::Phase(Phase::Generating));

        info!(
            chars = description.chars().count(),
            template = ?template_id,
            "starting generation"
        );

        let result = self.run(description, template_id, &token).await;
        let outcome = match result {
            Ok(()) => {
                info!(phase = %self.session.phase, "generation stream ended");
                SessionOutcome::Finished
            }
            Err(e) if e.is_canceled() => {
                info!(phase = %self.session.phase, "generation canceled");
                SessionOutcome::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "generation failed");
                let message = e.to_string();
                self.session.last_error = Some(message.clone());
                self.publish(SessionUpdate::Error(message));
                SessionOutcome::Finished
            }
        };

        // `done` without a later `scan_result` is only known complete here.
        self.commit_if_complete();
        self.deactivate();
        outcome
    }

    async fn run(
        &mut self,
        description: &str,
        template_id: Option<&str>,
        token: &CancellationToken,
    ) -> Result<(), GenerateError> {
        let request = GenerateRequest {
            description,
            template_id,
        };

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(GenerateError::Canceled),
            response = self.api.generate(&request) => response?,
        };

        self.consume(response.bytes_stream(), token).await
    }

    /// Feed a response body through the decoder and interpreter until it
    /// ends or `token` is canceled.
    async fn consume<S, B, E>(&mut self, body: S, token: &CancellationToken) -> Result<(), GenerateError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        tokio::pin!(body);
        let mut decoder = FrameDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Err(GenerateError::Canceled),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for payload in decoder.push(chunk.as_ref()) {
                        if let Some(update) = apply_frame(&mut self.session, &payload) {
                            self.publish(update);
                            if self.session.assessment.is_some() {
                                self.commit_if_complete();
                            }
                        }
                    }
                }
                Some(Err(e)) => return Err(GenerateError::Transport(e.to_string())),
                None => break,
            }
        }

        let discarded = decoder.finish();
        if discarded > 0 {
            warn!(discarded, "discarding unterminated trailing frame");
        }
        Ok(())
    }

    /// Install a fresh token, invalidating any token left by an earlier
    /// session that never finished.
    fn activate(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.active).replace(token.clone()) {
            warn!("invalidating previous in-flight session");
            previous.cancel();
        }
        token
    }

    fn deactivate(&self) {
        if let Some(token) = lock(&self.active).take() {
            token.cancel();
        }
    }

    fn commit_if_complete(&mut self) {
        if self.committed {
            return;
        }
        let Some(draft) = EntryDraft::from_session(&self.description, &self.session) else {
            return;
        };
        self.committed = true;

        if let Some(history) = self.history.as_mut() {
            match history.add(draft) {
                Ok(entry) => {
                    info!(id = %entry.id, "session committed to history");
                    self.committed_id = Some(entry.id.clone());
                }
                Err(e) => warn!(error = %e, "failed to persist history entry"),
            }
        }
    }

    fn publish(&mut self, update: SessionUpdate) {
        let closed = self
            .updates
            .as_ref()
            .is_some_and(|tx| tx.send(update).is_err());
        if closed {
            self.updates = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{dead_peer, spawn_peer};
    use crate::history::HISTORY_FILE;
    use crate::stream::RiskLevel;
    use axum::{
        body::Body,
        http::StatusCode,
        routing::post,
        Json, Router,
    };
    use futures::stream;
    use std::convert::Infallible;
    use std::time::Duration;
    use tempfile::TempDir;

    fn frame(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn offline_controller() -> SessionController {
        SessionController::new(ApiClient::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
        ))
    }

    async fn feed(controller: &mut SessionController, chunks: Vec<String>) -> Result<(), GenerateError> {
        let token = controller.activate();
        controller.session = GenerationSession::begin();
        let body = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        controller.consume(body, &token).await
    }

    fn streaming_peer(chunks: Vec<String>) -> Router {
        Router::new().route(
            "/api/generate",
            post(move || {
                let chunks = chunks.clone();
                async move { Body::from_stream(stream::iter(chunks.into_iter().map(Ok::<_, Infallible>))) }
            }),
        )
    }

    fn happy_frames() -> Vec<String> {
        vec![
            frame(r#"{"type":"phase","phase":"generating"}"#),
            frame(r#"{"type":"token","content":"---\nname: hello-world\n"}"#),
            frame(r#"{"type":"token","content":"---\n"}"#),
            frame(r#"{"type":"phase","phase":"validating"}"#),
            frame(r#"{"type":"validation","valid":true,"error":null}"#),
            frame(r#"{"type":"phase","phase":"scanning"}"#),
            frame(r#"{"type":"scan_result","results":{"score":100,"risk_level":"safe","issues":[],"summary":{},"disclaimer":"advisory"}}"#),
            frame(r#"{"type":"done","skill_md":"---\nname: hello-world\n---\n"}"#),
        ]
    }

    #[tokio::test]
    async fn tokens_split_across_chunks() {
        let mut controller = offline_controller();
        let body = format!(
            "{}{}{}",
            frame(r#"{"type":"token","content":"Hello"}"#),
            frame(r#"{"type":"token","content":", world"}"#),
            frame(r#"{"type":"done","skill_md":"Hello, world"}"#),
        );
        let chunks = body
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();

        feed(&mut controller, chunks).await.unwrap();

        let session = controller.session();
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(session.accumulated_text(), "Hello, world");
        assert_eq!(session.final_artifact(), Some("Hello, world"));
    }

    #[tokio::test]
    async fn trailing_partial_frame_is_ignored() {
        let mut controller = offline_controller();
        let chunks = vec![
            frame(r#"{"type":"token","content":"kept"}"#),
            r#"data: {"type":"done","skill_md":"never"}"#.to_string(),
        ];
        feed(&mut controller, chunks).await.unwrap();

        assert_eq!(controller.session().accumulated_text(), "kept");
        assert!(controller.session().final_artifact().is_none());
        assert_eq!(controller.session().phase(), Phase::Generating);
    }

    #[tokio::test]
    async fn body_error_is_transport_failure() {
        let mut controller = offline_controller();
        let token = controller.activate();
        let body = stream::iter(vec![
            Ok(frame(r#"{"type":"token","content":"a"}"#)),
            Err("connection reset by peer"),
        ]);

        let err = controller.consume(body, &token).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset by peer");
        assert_eq!(controller.session().accumulated_text(), "a");
    }

    #[tokio::test]
    async fn cancel_before_first_frame() {
        let mut controller = offline_controller();
        let token = controller.activate();
        controller.session = GenerationSession::begin();
        let canceller = controller.canceller();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let body = stream::pending::<Result<String, Infallible>>();
        let err = controller.consume(body, &token).await.unwrap_err();
        assert!(err.is_canceled());
        assert!(controller.session().last_error().is_none());
        assert_eq!(controller.session().phase(), Phase::Generating);
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn activate_invalidates_previous_token() {
        let controller = offline_controller();
        let first = controller.activate();
        let second = controller.activate();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(controller.is_active());

        controller.deactivate();
        assert!(second.is_cancelled());
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn empty_description_is_rejected() {
        let mut controller = offline_controller();
        assert_eq!(controller.start("   \n", None).await, SessionOutcome::Rejected);
        assert_eq!(controller.session().phase(), Phase::Idle);
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn full_session_commits_once() {
        let dir = TempDir::new().unwrap();
        let history = HistoryCache::load(dir.path().join(HISTORY_FILE));
        let base = spawn_peer(streaming_peer(happy_frames())).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base))
                .with_history(history);
        let mut updates = controller.subscribe();

        let outcome = controller.start("a hello world skill", None).await;
        assert_eq!(outcome, SessionOutcome::Finished);

        let session = controller.session();
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(session.final_artifact(), Some("---\nname: hello-world\n---\n"));
        assert_eq!(session.assessment().unwrap().score, 100);
        assert!(session.last_error().is_none());

        let history = controller.history().unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history.entries()[0];
        assert_eq!(entry.description, "a hello world skill");
        assert_eq!(entry.skill_name, "hello-world");
        assert_eq!(entry.scan_score, 100);
        assert!(entry.scan_result.is_some());
        assert_eq!(HistoryCache::load(history.path()).entries(), history.entries());
        assert_eq!(controller.committed_entry(), Some(entry));

        assert_eq!(updates.recv().await, Some(SessionUpdate::Phase(Phase::Generating)));
        let mut tokens = String::new();
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Token(t) = update {
                tokens.push_str(&t);
            }
        }
        assert_eq!(tokens, "---\nname: hello-world\n---\n");
    }

    #[tokio::test]
    async fn duplicate_terminal_records_commit_once() {
        let dir = TempDir::new().unwrap();
        let mut frames = happy_frames();
        frames.push(frame(r#"{"type":"done","skill_md":"---\nname: hello-world\n---\n"}"#));
        frames.push(frame(r#"{"type":"scan_result","results":{"score":100,"risk_level":"safe"}}"#));
        let base = spawn_peer(streaming_peer(frames)).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base))
                .with_history(HistoryCache::load(dir.path().join(HISTORY_FILE)));

        controller.start("twice", None).await;
        assert_eq!(controller.history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restart_clears_previous_session() {
        let first = [
            frame(r#"{"type":"token","content":"draft"}"#),
            frame(r#"{"type":"scan_result","results":{"score":42,"risk_level":"high"}}"#),
            frame(r#"{"type":"done","skill_md":"---\nname: first\n---\n"}"#),
            frame(r#"{"type":"error","content":"boom"}"#),
        ]
        .concat();
        let second = frame(r#"{"type":"token","content":"fresh"}"#);
        let app = Router::new().route(
            "/api/generate",
            post(move |Json(body): Json<serde_json::Value>| {
                let reply = if body["description"] == "first" {
                    first.clone()
                } else {
                    second.clone()
                };
                async move { reply }
            }),
        );
        let base = spawn_peer(app).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));

        controller.start("first", None).await;
        let session = controller.session();
        assert_eq!(session.last_error(), Some("boom"));
        assert_eq!(session.assessment().unwrap().score, 42);
        assert!(session.final_artifact().is_some());

        let mut updates = controller.subscribe();
        assert_eq!(controller.start("second", None).await, SessionOutcome::Finished);
        assert_eq!(updates.recv().await, Some(SessionUpdate::Phase(Phase::Generating)));
        assert_eq!(updates.recv().await, Some(SessionUpdate::Token("fresh".to_string())));

        let session = controller.session();
        assert_eq!(session.phase(), Phase::Generating);
        assert_eq!(session.accumulated_text(), "fresh");
        assert!(session.last_error().is_none());
        assert!(session.assessment().is_none());
        assert!(session.final_artifact().is_none());
    }

    #[tokio::test]
    async fn done_before_scan_result_keeps_assessment() {
        let frames = vec![
            frame(r#"{"type":"token","content":"---\nname: late-scan\n---\n"}"#),
            frame(r#"{"type":"done","skill_md":"---\nname: late-scan\n---\n"}"#),
            frame(r#"{"type":"scan_result","results":{"score":42,"risk_level":"high","issues":[{"severity":"high","message":"Sudo usage detected","line":3}]}}"#),
        ];
        let dir = TempDir::new().unwrap();
        let base = spawn_peer(streaming_peer(frames)).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base))
                .with_history(HistoryCache::load(dir.path().join(HISTORY_FILE)));

        assert_eq!(controller.start("late scan", None).await, SessionOutcome::Finished);

        let history = controller.history().unwrap();
        assert_eq!(history.len(), 1);
        let entry = &history.entries()[0];
        assert_eq!(entry.skill_name, "late-scan");
        assert_eq!(entry.scan_score, 42);
        assert_eq!(entry.risk_level, RiskLevel::High);
        assert_eq!(entry.scan_result.as_ref().unwrap().issues.len(), 1);
    }

    #[tokio::test]
    async fn done_without_scan_commits_at_end_of_body() {
        let frames = vec![frame(r#"{"type":"done","skill_md":"---\nname: unscanned\n---\n"}"#)];
        let dir = TempDir::new().unwrap();
        let base = spawn_peer(streaming_peer(frames)).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base))
                .with_history(HistoryCache::load(dir.path().join(HISTORY_FILE)));

        controller.start("no scan", None).await;

        let entry = controller.committed_entry().unwrap();
        assert_eq!(entry.skill_name, "unscanned");
        assert_eq!(entry.scan_score, 0);
        assert_eq!(entry.risk_level, RiskLevel::Unknown);
        assert!(entry.scan_result.is_none());
    }

    #[tokio::test]
    async fn validation_failure_without_terminal() {
        let frames = vec![
            frame(r#"{"type":"phase","phase":"generating"}"#),
            frame(r#"{"type":"token","content":"oops"}"#),
            frame(r#"{"type":"phase","phase":"validating"}"#),
            frame(r#"{"type":"validation","valid":false,"retrying":true,"error":"missing field X"}"#),
            frame(r#"{"type":"validation","valid":false,"retrying":false,"error":"missing field X"}"#),
            frame(r#"{"type":"error","content":"Generated SKILL.md is invalid after retry: missing field X"}"#),
        ];
        let dir = TempDir::new().unwrap();
        let base = spawn_peer(streaming_peer(frames)).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base))
                .with_history(HistoryCache::load(dir.path().join(HISTORY_FILE)));

        assert_eq!(controller.start("bad", None).await, SessionOutcome::Finished);
        let session = controller.session();
        assert_eq!(session.phase(), Phase::Validating);
        assert!(session.last_error().unwrap().contains("missing field X"));
        assert!(controller.history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_body_shape() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<serde_json::Value>| async move {
                let echoed = format!(
                    "{}|{}",
                    body["description"].as_str().unwrap_or("?"),
                    body["template_id"]
                );
                let payload = serde_json::json!({"type": "done", "skill_md": echoed});
                format!("data: {payload}\n\n")
            }),
        );
        let base = spawn_peer(app).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));

        controller.start("  pdf tool  ", None).await;
        assert_eq!(controller.session().final_artifact(), Some("pdf tool|null"));

        controller.start("pdf tool", Some("web-scraper")).await;
        assert_eq!(
            controller.session().final_artifact(),
            Some("pdf tool|\"web-scraper\"")
        );
    }

    #[tokio::test]
    async fn http_error_detail_becomes_last_error() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({"detail": "Rate limit exceeded. Try again later."})),
                )
            }),
        );
        let base = spawn_peer(app).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));

        assert_eq!(controller.start("x", None).await, SessionOutcome::Finished);
        assert_eq!(
            controller.session().last_error(),
            Some("Rate limit exceeded. Try again later.")
        );
        assert_eq!(controller.session().phase(), Phase::Generating);
    }

    #[tokio::test]
    async fn http_error_without_body_reports_status() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_peer(app).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));

        controller.start("x", None).await;
        assert_eq!(controller.session().last_error(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn unreachable_peer_is_actionable() {
        let base = dead_peer().await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));

        assert_eq!(controller.start("x", None).await, SessionOutcome::Finished);
        let error = controller.session().last_error().unwrap();
        assert!(error.starts_with("Cannot reach the backend server"));
        assert!(error.contains(&base));
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn cancel_mid_stream_over_http() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async {
                let first = stream::iter(vec![Ok::<_, Infallible>(frame(
                    r#"{"type":"token","content":"partial"}"#,
                ))]);
                Body::from_stream(first.chain(stream::pending()))
            }),
        );
        let base = spawn_peer(app).await;
        let mut controller =
            SessionController::new(ApiClient::with_client(reqwest::Client::new(), &base));
        let mut updates = controller.subscribe();
        let canceller = controller.canceller();

        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if matches!(update, SessionUpdate::Token(_)) {
                    canceller.cancel();
                }
            }
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), controller.start("x", None))
            .await
            .expect("cancellation should end the session");
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(controller.session().accumulated_text(), "partial");
        assert!(controller.session().last_error().is_none());
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let mut controller = offline_controller();
        feed(&mut controller, vec![frame(r#"{"type":"error","content":"boom"}"#)])
            .await
            .unwrap();
        assert!(controller.session().last_error().is_some());

        controller.reset();
        assert_eq!(controller.session(), &GenerationSession::new());
        assert_eq!(controller.session().phase(), Phase::Idle);
    }
}
