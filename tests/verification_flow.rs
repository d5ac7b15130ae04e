use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use once_cell::sync::Lazy;
use sonic_rs::JsonValueTrait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use vitalis::{
    config::{Config, VerificationPolicy},
    error::Result,
    models::{
        challenge::Challenge,
        feedback::{Feedback, FeedbackType},
        nonce::NonceRecord,
        audit::AuditQuery,
        scoring::ComponentScores,
        session::{SessionStatus, TerminationReason},
    },
    repositories::{memory::MemoryStore, store::Store},
    services::{
        analyzer::{ChallengeVerdict, Frame, FrameAnalyzer},
        credentials::{CredentialIssuer, fingerprint},
    },
    state::AppState,
};

static ISSUER: Lazy<Arc<CredentialIssuer>> =
    Lazy::new(|| Arc::new(CredentialIssuer::generate().expect("key generation")));

/// Analyzer double that replays a fixed list of verdicts.
struct ScriptedAnalyzer {
    verdicts: Mutex<VecDeque<bool>>,
    scores: ComponentScores,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    fn new(verdicts: &[bool], score: f64) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.iter().copied().collect()),
            scores: ComponentScores {
                liveness: score,
                deepfake: score,
                emotion: score,
            },
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FrameAnalyzer for ScriptedAnalyzer {
    async fn verify_challenge(&self, frames: &[Frame], _challenge: &Challenge) -> Result<ChallengeVerdict> {
        assert!(!frames.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        let completed = self.verdicts.lock().unwrap().pop_front().unwrap_or(false);
        Ok(ChallengeVerdict {
            completed,
            confidence: if completed { 0.92 } else { 0.15 },
        })
    }

    async fn analyze(&self, _frames: &[Frame]) -> Result<ComponentScores> {
        Ok(self.scores)
    }
}

fn config(policy: VerificationPolicy) -> Config {
    Config {
        bind_addr: "127.0.0.1:8000".parse().unwrap(),
        public_ws_base: None,
        cors_origins: Vec::new(),
        redis_url: None,
        database_url: None,
        private_key_path: "keys/private_key.pem".into(),
        public_key_path: "keys/public_key.pem".into(),
        analyzer_url: None,
        analyzer_concurrency: 4,
        audit_api_key: None,
        policy,
    }
}

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
    session_id: Uuid,
    inbound: Option<mpsc::Sender<String>>,
    outbound: mpsc::Receiver<Feedback>,
    handle: JoinHandle<()>,
}

impl Harness {
    async fn start(analyzer: Arc<dyn FrameAnalyzer>, policy: VerificationPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::from_parts(config(policy), store.clone(), ISSUER.clone(), analyzer);
        let session = state.sessions.create("user1").await.unwrap();
        Self::attach(state, store, session.session_id)
    }

    fn attach(state: AppState, store: Arc<MemoryStore>, session_id: Uuid) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let orchestrator = state.orchestrator.clone();
        let handle = tokio::spawn(async move {
            orchestrator.run(session_id, inbound_rx, outbound_tx).await;
        });

        Self {
            state,
            store,
            session_id,
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            handle,
        }
    }

    async fn next(&mut self) -> Feedback {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("no message within 5s")
            .expect("channel closed")
    }

    async fn expect(&mut self, kind: FeedbackType) -> Feedback {
        let feedback = self.next().await;
        assert_eq!(feedback.kind, kind, "unexpected message: {:?}", feedback);
        feedback
    }

    async fn expect_error(&mut self, code: &str) {
        let feedback = self.expect(FeedbackType::Error).await;
        assert_eq!(feedback.data.get("code").as_str(), Some(code));
    }

    async fn send(&self, text: String) {
        self.inbound.as_ref().unwrap().send(text).await.unwrap();
    }

    async fn send_frame(&self) {
        self.send(frame_message()).await;
    }

    async fn complete(&self, challenge_id: &str, nonce: &str) {
        self.send(format!(
            r#"{{"type":"challenge_complete","challenge_id":"{}","nonce":"{}"}}"#,
            challenge_id, nonce
        ))
        .await;
    }

    async fn assert_closed(mut self) {
        let rest = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("channel must close");
        assert!(rest.is_none(), "unexpected trailing message: {:?}", rest);
        self.inbound.take();
        self.handle.await.unwrap();
    }

    async fn status(&self) -> SessionStatus {
        self.state.sessions.get(self.session_id).await.unwrap().status
    }
}

fn frame_message() -> String {
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0];
    jpeg.resize(256, 0x11);
    format!(
        r#"{{"type":"video_frame","frame":"data:image/jpeg;base64,{}"}}"#,
        general_purpose::STANDARD.encode(jpeg)
    )
}

fn issued(feedback: &Feedback) -> (String, String) {
    let challenge_id = feedback.data.get("challenge_id").as_str().unwrap().to_string();
    let nonce = feedback.data.get("nonce").as_str().unwrap().to_string();
    (challenge_id, nonce)
}

#[tokio::test]
async fn successful_verification_issues_token() {
    let analyzer = ScriptedAnalyzer::new(&[true, true, true], 0.9);
    let mut h = Harness::start(analyzer.clone(), VerificationPolicy::default()).await;

    let first = h.expect(FeedbackType::ChallengeIssued).await;
    assert_eq!(first.data.get("timeout_seconds").as_u64(), Some(10));
    assert_eq!(first.data.get("total").as_u64(), Some(3));
    let (mut challenge_id, nonce) = issued(&first);
    assert_eq!(nonce.len(), 32);

    for step in 0..3 {
        h.send_frame().await;
        h.complete(&challenge_id, &nonce).await;

        let completed = h.expect(FeedbackType::ChallengeCompleted).await;
        assert_eq!(completed.data.get("challenge_id").as_str(), Some(challenge_id.as_str()));
        assert_eq!(completed.data.get("consecutive_failures").as_u64(), Some(0));

        if step < 2 {
            let next = h.expect(FeedbackType::ChallengeIssued).await;
            let (id, next_nonce) = issued(&next);
            assert_eq!(next_nonce, nonce);
            assert_eq!(next.data.get("index").as_u64(), Some(step + 1));
            challenge_id = id;
        }
    }

    let score = h.expect(FeedbackType::ScoreUpdate).await;
    assert_eq!(score.data.get("passed").as_bool(), Some(true));

    let success = h.expect(FeedbackType::VerificationSuccess).await;
    let token = success.data.get("token").as_str().unwrap().to_string();

    let validation = ISSUER.validate(&token);
    assert!(validation.valid);
    assert_eq!(validation.user_id.as_deref(), Some("user1"));
    assert_eq!(validation.session_id, Some(h.session_id.to_string()));
    assert_eq!(success.data.get("expires_at").as_i64(), validation.expires_at);

    assert_eq!(h.status().await, SessionStatus::Completed);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);

    let result = h.store.get_verification_result(h.session_id).await.unwrap().unwrap();
    assert!(result.passed);
    let record = h.store.get_token(&fingerprint(&token)).await.unwrap().unwrap();
    assert_eq!(record.session_id, h.session_id);

    let events: Vec<String> = h
        .store
        .query_audit(&AuditQuery { user_id: Some("user1".into()), limit: 100, ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    for expected in [
        "session_created",
        "challenge_completion",
        "verification_result",
        "session_terminated",
        "token_issuance",
    ] {
        assert!(events.iter().any(|e| e == expected), "missing {}", expected);
    }

    h.assert_closed().await;
}

#[tokio::test]
async fn three_consecutive_failures_end_session() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[false, false, false], 0.9), VerificationPolicy::default()).await;
    let (mut challenge_id, nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    for failures in 1..=3u64 {
        h.send_frame().await;
        h.complete(&challenge_id, &nonce).await;
        let failed = h.expect(FeedbackType::ChallengeFailed).await;
        assert_eq!(failed.data.get("consecutive_failures").as_u64(), Some(failures));

        if failures < 3 {
            challenge_id = issued(&h.expect(FeedbackType::ChallengeIssued).await).0;
        }
    }

    h.expect_error("MAX_FAILURES").await;
    assert_eq!(h.status().await, SessionStatus::Failed);
    h.assert_closed().await;
}

#[tokio::test]
async fn low_score_fails_without_token() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[true, true, true], 0.5), VerificationPolicy::default()).await;
    let (mut challenge_id, nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    for step in 0..3 {
        h.send_frame().await;
        h.complete(&challenge_id, &nonce).await;
        h.expect(FeedbackType::ChallengeCompleted).await;
        if step < 2 {
            challenge_id = issued(&h.expect(FeedbackType::ChallengeIssued).await).0;
        }
    }

    let score = h.expect(FeedbackType::ScoreUpdate).await;
    assert_eq!(score.data.get("passed").as_bool(), Some(false));
    h.expect(FeedbackType::VerificationFailed).await;

    assert_eq!(h.status().await, SessionStatus::Failed);
    let result = h.store.get_verification_result(h.session_id).await.unwrap().unwrap();
    assert!(!result.passed);
    h.assert_closed().await;
}

#[tokio::test]
async fn exhausted_sequence_gets_fresh_nonce() {
    let script = [false, false, true, true, true];
    let mut h = Harness::start(ScriptedAnalyzer::new(&script, 0.9), VerificationPolicy::default()).await;
    let (mut challenge_id, first_nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);
    let mut nonce = first_nonce.clone();

    for (step, completed) in script.iter().enumerate() {
        h.send_frame().await;
        h.complete(&challenge_id, &nonce).await;
        let kind = if *completed { FeedbackType::ChallengeCompleted } else { FeedbackType::ChallengeFailed };
        h.expect(kind).await;

        if step == 4 {
            break;
        }
        let next = h.expect(FeedbackType::ChallengeIssued).await;
        let (id, next_nonce) = issued(&next);
        if step == 2 {
            assert_ne!(next_nonce, first_nonce);
            assert_eq!(next.data.get("index").as_u64(), Some(0));
            let ordinal = next
                .data
                .get("challenge_id")
                .as_str()
                .and_then(|raw| raw.parse::<vitalis::models::challenge::ChallengeId>().ok())
                .map(|id| id.ordinal);
            assert_eq!(ordinal, Some(3));
        }
        challenge_id = id;
        nonce = next_nonce;
    }

    h.expect(FeedbackType::ScoreUpdate).await;
    h.expect(FeedbackType::VerificationSuccess).await;
    assert_eq!(h.status().await, SessionStatus::Completed);
    h.assert_closed().await;
}

#[tokio::test]
async fn unknown_nonce_is_a_mismatch() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[true], 0.9), VerificationPolicy::default()).await;
    let (challenge_id, _) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    h.complete(&challenge_id, &"0".repeat(32)).await;
    h.expect_error("NONCE_MISMATCH").await;
    assert_eq!(h.status().await, SessionStatus::Failed);
    h.assert_closed().await;
}

#[tokio::test]
async fn used_nonce_is_a_replay() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[true], 0.9), VerificationPolicy::default()).await;
    let (challenge_id, _) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    let replayed = "ab".repeat(16);
    h.store
        .store_nonce(&NonceRecord {
            nonce: replayed.clone(),
            session_id: Uuid::new_v4(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    h.complete(&challenge_id, &replayed).await;
    h.expect_error("REPLAY_DETECTED").await;
    assert_eq!(h.status().await, SessionStatus::Failed);

    let replays = h
        .store
        .query_audit(&AuditQuery { limit: 100, ..Default::default() })
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == "replay_detected")
        .count();
    assert_eq!(replays, 1);
    h.assert_closed().await;
}

#[tokio::test]
async fn recoverable_client_mistakes_keep_session_open() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[true], 0.9), VerificationPolicy::default()).await;
    let (challenge_id, nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    h.send("hello".to_string()).await;
    h.expect_error("INVALID_MESSAGE").await;

    h.send(r#"{"type":"video_frame","frame":"%%%"}"#.to_string()).await;
    h.expect_error("INVALID_FRAME").await;

    h.complete("not-the-pending-challenge", &nonce).await;
    h.expect_error("UNKNOWN_CHALLENGE").await;

    h.send(format!(r#"{{"type":"challenge_complete","challenge_id":"{}"}}"#, challenge_id)).await;
    h.expect_error("INVALID_MESSAGE").await;

    assert_eq!(h.status().await, SessionStatus::Active);

    h.send_frame().await;
    h.complete(&challenge_id, &nonce).await;
    h.expect(FeedbackType::ChallengeCompleted).await;
}

#[tokio::test]
async fn completion_without_frames_fails_challenge() {
    let analyzer = ScriptedAnalyzer::new(&[true], 0.9);
    let mut h = Harness::start(analyzer.clone(), VerificationPolicy::default()).await;
    let (challenge_id, nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    h.complete(&challenge_id, &nonce).await;
    let failed = h.expect(FeedbackType::ChallengeFailed).await;
    assert_eq!(failed.data.get("reason").as_str(), Some("no_frames"));
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn challenge_timeout_counts_as_failure() {
    let policy = VerificationPolicy {
        challenge_timeout: Duration::from_millis(150),
        ..VerificationPolicy::default()
    };
    let mut h = Harness::start(ScriptedAnalyzer::new(&[], 0.9), policy).await;
    let (challenge_id, _) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    let failed = h.expect(FeedbackType::ChallengeFailed).await;
    assert_eq!(failed.data.get("challenge_id").as_str(), Some(challenge_id.as_str()));
    assert_eq!(failed.data.get("reason").as_str(), Some("timeout"));
    assert_eq!(failed.data.get("confidence").as_f64(), Some(0.0));

    h.expect(FeedbackType::ChallengeIssued).await;
    assert_eq!(h.status().await, SessionStatus::Active);
}

#[tokio::test]
async fn session_times_out_while_idle() {
    let policy = VerificationPolicy {
        max_session_duration: Duration::from_millis(300),
        ..VerificationPolicy::default()
    };
    let mut h = Harness::start(ScriptedAnalyzer::new(&[], 0.9), policy).await;
    h.expect(FeedbackType::ChallengeIssued).await;

    h.expect_error("SESSION_TIMEOUT").await;
    assert_eq!(h.status().await, SessionStatus::Timeout);
    h.assert_closed().await;
}

#[tokio::test]
async fn results_after_termination_are_discarded() {
    let mut h = Harness::start(ScriptedAnalyzer::new(&[false], 0.9), VerificationPolicy::default()).await;
    let (challenge_id, nonce) = issued(&h.expect(FeedbackType::ChallengeIssued).await);

    h.state
        .sessions
        .terminate(h.session_id, TerminationReason::Timeout)
        .await
        .unwrap();

    h.send_frame().await;
    h.complete(&challenge_id, &nonce).await;
    h.expect_error("SESSION_CLOSED").await;

    let session = h.state.sessions.get(h.session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Timeout);
    assert_eq!(session.consecutive_failure_count, 0);
    h.assert_closed().await;
}

#[tokio::test]
async fn unknown_session_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_parts(
        config(VerificationPolicy::default()),
        store.clone(),
        ISSUER.clone(),
        ScriptedAnalyzer::new(&[], 0.9),
    );
    let mut h = Harness::attach(state, store, Uuid::new_v4());

    h.expect_error("INVALID_SESSION").await;
    h.assert_closed().await;
}

#[tokio::test]
async fn expired_session_cannot_bind() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_parts(
        config(VerificationPolicy::default()),
        store.clone(),
        ISSUER.clone(),
        ScriptedAnalyzer::new(&[], 0.9),
    );
    let mut session = state.sessions.create("user1").await.unwrap();
    session.start_time = Utc::now() - chrono::Duration::seconds(121);
    store.update_session(&session).await.unwrap();

    let mut h = Harness::attach(state, store, session.session_id);
    h.expect_error("SESSION_TIMEOUT").await;
    assert_eq!(h.status().await, SessionStatus::Timeout);
    h.assert_closed().await;
}

#[tokio::test]
async fn closed_session_cannot_bind() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::from_parts(
        config(VerificationPolicy::default()),
        store.clone(),
        ISSUER.clone(),
        ScriptedAnalyzer::new(&[], 0.9),
    );
    let session = state.sessions.create("user1").await.unwrap();
    state
        .sessions
        .terminate(session.session_id, TerminationReason::Completed)
        .await
        .unwrap();

    let mut h = Harness::attach(state, store, session.session_id);
    h.expect_error("SESSION_CLOSED").await;
    h.assert_closed().await;
}
