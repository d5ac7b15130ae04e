use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use uuid::Uuid;

use crate::{
    config::VerificationPolicy,
    error::{AppError, Result},
    models::{
        audit::AuditEvent,
        challenge::{Challenge, ChallengeResult, ChallengeSequence},
        credential::TokenRecord,
        feedback::{ClientMessage, Feedback, FeedbackType},
        scoring::{ComponentScores, ScoringResult},
        session::{Session, TerminationReason},
    },
    repositories::store::Store,
    services::{
        analyzer::{Frame, FrameAnalyzer, decode_frame},
        audit::AuditLog,
        challenges::ChallengeGenerator,
        credentials::CredentialIssuer,
        nonces::NonceStore,
        scoring,
        sessions::SessionManager,
    },
};

/// Frames kept for the challenge currently being performed.
const CHALLENGE_FRAME_WINDOW: usize = 30;
/// Frames kept across the session for the final scoring pass.
const SCORING_SAMPLE_SIZE: usize = 8;

/// Whether the channel stays open after handling an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Per-channel progress. Everything durable lives in the session store.
struct Run {
    session: Session,
    sequence: ChallengeSequence,
    index: usize,
    issued: u32,
    successes: usize,
    frames: VecDeque<Frame>,
    sample: Vec<Frame>,
    frames_seen: usize,
    challenge_deadline: Instant,
}

impl Run {
    fn current(&self) -> Option<&Challenge> {
        self.sequence.challenges.get(self.index)
    }

    fn push_frame(&mut self, frame: Frame) {
        if self.sample.len() < SCORING_SAMPLE_SIZE {
            self.sample.push(frame.clone());
        } else {
            let slot = self.frames_seen % SCORING_SAMPLE_SIZE;
            self.sample[slot] = frame.clone();
        }
        self.frames_seen += 1;

        if self.frames.len() == CHALLENGE_FRAME_WINDOW {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }
}

/// Drives one verification channel.
///
/// Every state change goes through [`SessionManager`]; the orchestrator only
/// keeps the position inside the current challenge sequence and the frames
/// buffered for the analyzer. No session lock is held while the analyzer runs.
#[derive(Clone)]
pub struct VerificationOrchestrator {
    sessions: SessionManager,
    challenges: ChallengeGenerator,
    nonces: NonceStore,
    issuer: Arc<CredentialIssuer>,
    analyzer: Arc<dyn FrameAnalyzer>,
    store: Arc<dyn Store>,
    audit: AuditLog,
    policy: VerificationPolicy,
}

impl VerificationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: SessionManager,
        challenges: ChallengeGenerator,
        nonces: NonceStore,
        issuer: Arc<CredentialIssuer>,
        analyzer: Arc<dyn FrameAnalyzer>,
        store: Arc<dyn Store>,
        audit: AuditLog,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            sessions,
            challenges,
            nonces,
            issuer,
            analyzer,
            store,
            audit,
            policy,
        }
    }

    /// Runs the protocol for `session_id` until the session ends or the
    /// client goes away.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session the channel is bound to.
    /// * `inbound` - Raw text messages from the client.
    /// * `outbound` - Messages for the client. Dropped when the run ends.
    pub async fn run(
        &self,
        session_id: Uuid,
        mut inbound: mpsc::Receiver<String>,
        outbound: mpsc::Sender<Feedback>,
    ) {
        let Some(mut run) = self.bind(session_id, &outbound).await else {
            return;
        };
        let mut session_deadline = self.session_deadline(&run.session);

        loop {
            let flow = tokio::select! {
                message = inbound.recv() => match message {
                    Some(text) => self.handle_message(&mut run, &text, &outbound).await,
                    None => {
                        tracing::info!("Client left session {}", session_id);
                        Flow::Close
                    }
                },
                _ = sleep_until(run.challenge_deadline) => {
                    self.challenge_timed_out(&mut run, &outbound).await
                }
                _ = sleep_until(session_deadline) => {
                    if self.sessions.is_timed_out(session_id).await {
                        self.end(&run, TerminationReason::Timeout, &AppError::SessionTimeout, &outbound)
                            .await
                    } else {
                        session_deadline = Instant::now() + Duration::from_millis(10);
                        Flow::Continue
                    }
                }
            };

            if flow == Flow::Close {
                break;
            }
        }
    }

    /// Checks the session can accept a channel and issues the first sequence.
    async fn bind(&self, session_id: Uuid, outbound: &mpsc::Sender<Feedback>) -> Option<Run> {
        let session = match self.sessions.get(session_id).await {
            Ok(session) => session,
            Err(e) => {
                emit(outbound, Feedback::error(e.code(), e.public_message())).await;
                return None;
            }
        };

        if !session.is_active() {
            let e = AppError::SessionClosed;
            emit(outbound, Feedback::error(e.code(), e.public_message())).await;
            return None;
        }

        if self.sessions.expired_at(&session, Utc::now()) {
            if let Err(e) = self.sessions.terminate(session_id, TerminationReason::Timeout).await {
                tracing::error!("❌ Failed to time out session {}: {}", session_id, e);
            }
            let e = AppError::SessionTimeout;
            emit(outbound, Feedback::error(e.code(), e.public_message())).await;
            return None;
        }

        let mut run = Run {
            session,
            sequence: ChallengeSequence {
                session_id,
                nonce: String::new(),
                generated_at: Utc::now(),
                challenges: Vec::new(),
            },
            index: 0,
            issued: 0,
            successes: 0,
            frames: VecDeque::with_capacity(CHALLENGE_FRAME_WINDOW),
            sample: Vec::with_capacity(SCORING_SAMPLE_SIZE),
            frames_seen: 0,
            challenge_deadline: Instant::now(),
        };

        tracing::info!("🔗 Channel bound to session {}", session_id);
        match self.next_sequence(&mut run, outbound).await {
            Flow::Continue => Some(run),
            Flow::Close => None,
        }
    }

    fn session_deadline(&self, session: &Session) -> Instant {
        let elapsed = (Utc::now() - session.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.policy.max_session_duration.saturating_sub(elapsed);
        // Timeout is strictly after the cap.
        Instant::now() + remaining + Duration::from_millis(1)
    }

    async fn handle_message(
        &self,
        run: &mut Run,
        text: &str,
        outbound: &mpsc::Sender<Feedback>,
    ) -> Flow {
        let message: ClientMessage = match sonic_rs::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Unparseable message on session {}: {}", run.session.session_id, e);
                emit(outbound, Feedback::error("INVALID_MESSAGE", "Invalid message format")).await;
                return Flow::Continue;
            }
        };

        match message {
            ClientMessage::VideoFrame { frame } => {
                match decode_frame(&frame, Utc::now()) {
                    Ok(frame) => run.push_frame(frame),
                    Err(e) => {
                        emit(outbound, Feedback::error(e.code(), e.public_message())).await;
                    }
                }
                Flow::Continue
            }
            ClientMessage::ChallengeComplete { challenge_id, nonce } => {
                self.challenge_complete(run, &challenge_id, nonce.as_deref(), outbound)
                    .await
            }
        }
    }

    async fn challenge_complete(
        &self,
        run: &mut Run,
        challenge_id: &str,
        nonce: Option<&str>,
        outbound: &mpsc::Sender<Feedback>,
    ) -> Flow {
        let Some(nonce) = nonce else {
            emit(outbound, Feedback::error("INVALID_MESSAGE", "Missing nonce")).await;
            return Flow::Continue;
        };

        if nonce != run.sequence.nonce {
            return self.reject_nonce(run, nonce, outbound).await;
        }

        let Some(challenge) = run.current().cloned() else {
            emit(outbound, Feedback::error("UNKNOWN_CHALLENGE", "No challenge is pending")).await;
            return Flow::Continue;
        };

        if challenge.challenge_id != challenge_id {
            emit(outbound, Feedback::error("UNKNOWN_CHALLENGE", "Challenge is not the pending one")).await;
            return Flow::Continue;
        }

        let frames: Vec<Frame> = run.frames.drain(..).collect();
        let (result, reason) = self.evaluate(&challenge, &frames).await;
        self.apply_result(run, result, reason, outbound).await
    }

    /// Asks the analyzer for a verdict. Any analyzer problem fails the challenge.
    async fn evaluate(&self, challenge: &Challenge, frames: &[Frame]) -> (ChallengeResult, Option<&'static str>) {
        let now = Utc::now();

        if frames.is_empty() {
            return (ChallengeResult::timed_out(challenge.challenge_id.clone(), now), Some("no_frames"));
        }

        match timeout(self.policy.challenge_timeout, self.analyzer.verify_challenge(frames, challenge)).await {
            Ok(Ok(verdict)) => {
                let verdict = verdict.clamped();
                (
                    ChallengeResult {
                        challenge_id: challenge.challenge_id.clone(),
                        completed: verdict.completed,
                        confidence: verdict.confidence,
                        observed_at: Utc::now(),
                    },
                    None,
                )
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️  Analyzer failed on {}: {}", challenge.challenge_id, e);
                (
                    ChallengeResult::timed_out(challenge.challenge_id.clone(), Utc::now()),
                    Some("analyzer_unavailable"),
                )
            }
            Err(_) => {
                tracing::warn!("⚠️  Analyzer timed out on {}", challenge.challenge_id);
                (
                    ChallengeResult::timed_out(challenge.challenge_id.clone(), Utc::now()),
                    Some("analyzer_timeout"),
                )
            }
        }
    }

    async fn challenge_timed_out(&self, run: &mut Run, outbound: &mpsc::Sender<Feedback>) -> Flow {
        let Some(challenge) = run.current().cloned() else {
            run.challenge_deadline = Instant::now() + self.policy.challenge_timeout;
            return Flow::Continue;
        };

        tracing::debug!("Challenge {} timed out", challenge.challenge_id);
        run.frames.clear();
        let result = ChallengeResult::timed_out(challenge.challenge_id, Utc::now());
        self.apply_result(run, result, Some("timeout"), outbound).await
    }

    /// Folds a result into the session and moves the protocol forward.
    async fn apply_result(
        &self,
        run: &mut Run,
        result: ChallengeResult,
        reason: Option<&'static str>,
        outbound: &mpsc::Sender<Feedback>,
    ) -> Flow {
        let session_id = run.session.session_id;

        let session = match self.sessions.record_result(session_id, &result).await {
            Ok(session) => session,
            Err(e @ (AppError::SessionClosed | AppError::SessionNotFound)) => {
                emit(outbound, Feedback::error(AppError::SessionClosed.code(), e.public_message())).await;
                return Flow::Close;
            }
            Err(e) => {
                emit(outbound, Feedback::error(e.code(), e.public_message())).await;
                return Flow::Close;
            }
        };
        run.session = session;

        let data = match reason {
            Some(reason) => sonic_rs::json!({
                "challenge_id": result.challenge_id.as_str(),
                "confidence": result.confidence,
                "consecutive_failures": run.session.consecutive_failure_count,
                "reason": reason,
            }),
            None => sonic_rs::json!({
                "challenge_id": result.challenge_id.as_str(),
                "confidence": result.confidence,
                "consecutive_failures": run.session.consecutive_failure_count,
            }),
        };

        if result.completed {
            run.successes += 1;
            emit(
                outbound,
                Feedback::new(FeedbackType::ChallengeCompleted, "Challenge completed", data),
            )
            .await;
        } else {
            emit(
                outbound,
                Feedback::new(FeedbackType::ChallengeFailed, "Challenge failed", data),
            )
            .await;
        }

        if self.sessions.is_timed_out(session_id).await {
            return self
                .end(run, TerminationReason::Timeout, &AppError::SessionTimeout, outbound)
                .await;
        }
        if self.sessions.is_over_failure_limit(session_id).await {
            return self
                .end(run, TerminationReason::MaxFailures, &AppError::FailureLimitExceeded, outbound)
                .await;
        }

        if run.successes >= self.policy.required_successes {
            return self.decide(run, outbound).await;
        }

        run.index += 1;
        if run.index >= run.sequence.challenges.len() {
            return self.next_sequence(run, outbound).await;
        }
        self.issue_current(run, outbound).await;
        Flow::Continue
    }

    /// Generates a sequence under a fresh nonce and issues its first challenge.
    async fn next_sequence(&self, run: &mut Run, outbound: &mpsc::Sender<Feedback>) -> Flow {
        let session_id = run.session.session_id;
        let sequence = self.challenges.generate_sequence_from(
            session_id,
            self.policy.challenges_per_sequence,
            run.issued,
        );

        let claimed = match self.nonce_expiry() {
            Ok(expires_at) => self.nonces.claim(&sequence.nonce, session_id, expires_at).await,
            Err(e) => Err(e),
        };
        match claimed {
            Ok(()) => {}
            Err(AppError::ReplayDetected) => {
                return self.security_violation(run, AppError::ReplayDetected, outbound).await;
            }
            Err(e) => {
                emit(outbound, Feedback::error(e.code(), e.public_message())).await;
                return Flow::Close;
            }
        }

        run.issued += sequence.challenges.len() as u32;
        run.sequence = sequence;
        run.index = 0;
        run.frames.clear();
        self.issue_current(run, outbound).await;
        Flow::Continue
    }

    fn nonce_expiry(&self) -> Result<DateTime<Utc>> {
        TimeDelta::from_std(self.policy.nonce_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| AppError::Internal("Nonce lifetime out of range".to_string()))
    }

    async fn issue_current(&self, run: &mut Run, outbound: &mpsc::Sender<Feedback>) {
        let Some(challenge) = run.current() else {
            return;
        };

        let feedback = Feedback::new(
            FeedbackType::ChallengeIssued,
            challenge.instruction.as_str(),
            sonic_rs::json!({
                "challenge_id": challenge.challenge_id.as_str(),
                "instruction": challenge.instruction.as_str(),
                "timeout_seconds": challenge.timeout_seconds,
                "type": challenge.kind.as_str(),
                "nonce": run.sequence.nonce.as_str(),
                "index": run.index,
                "total": run.sequence.challenges.len(),
            }),
        );

        run.challenge_deadline = Instant::now() + self.policy.challenge_timeout;
        emit(outbound, feedback).await;
    }

    /// A client presented a nonce other than the pending one.
    async fn reject_nonce(&self, run: &Run, nonce: &str, outbound: &mpsc::Sender<Feedback>) -> Flow {
        let err = match self.nonces.is_used(nonce).await {
            Ok(true) => AppError::ReplayDetected,
            Ok(false) => AppError::NonceMismatch,
            Err(e) => {
                tracing::error!("❌ Nonce lookup failed: {}", e);
                AppError::NonceMismatch
            }
        };
        self.security_violation(run, err, outbound).await
    }

    async fn security_violation(&self, run: &Run, err: AppError, outbound: &mpsc::Sender<Feedback>) -> Flow {
        let session_id = run.session.session_id;
        tracing::warn!("🚨 Security violation on session {}: {}", session_id, err);

        if matches!(err, AppError::ReplayDetected) {
            if let Err(e) = self
                .audit
                .record(
                    AuditEvent::ReplayDetected,
                    Some(session_id),
                    Some(&run.session.user_id),
                    sonic_rs::json!({ "code": err.code() }),
                )
                .await
            {
                tracing::error!("❌ Failed to audit replay on session {}: {}", session_id, e);
            }
        }

        self.end(run, TerminationReason::SecurityViolation, &err, outbound).await
    }

    /// Terminates the session and tells the client why.
    async fn end(
        &self,
        run: &Run,
        reason: TerminationReason,
        err: &AppError,
        outbound: &mpsc::Sender<Feedback>,
    ) -> Flow {
        if let Err(e) = self.sessions.terminate(run.session.session_id, reason).await {
            tracing::error!(
                "❌ Failed to terminate session {}: {}",
                run.session.session_id,
                e
            );
        }
        emit(outbound, Feedback::error(err.code(), err.public_message())).await;
        Flow::Close
    }

    /// Scores the session and either issues a credential or fails it.
    async fn decide(&self, run: &Run, outbound: &mpsc::Sender<Feedback>) -> Flow {
        match self.try_decide(run, outbound).await {
            Ok(flow) => flow,
            Err(e) => {
                tracing::error!(
                    "❌ Decision failed for session {}: {}",
                    run.session.session_id,
                    e
                );
                emit(outbound, Feedback::error(e.code(), e.public_message())).await;
                Flow::Close
            }
        }
    }

    async fn try_decide(&self, run: &Run, outbound: &mpsc::Sender<Feedback>) -> Result<Flow> {
        let session_id = run.session.session_id;
        let user_id = run.session.user_id.as_str();

        let scores = match timeout(self.policy.challenge_timeout, self.analyzer.analyze(&run.sample)).await {
            Ok(Ok(scores)) => scores.clamped(),
            Ok(Err(e)) => {
                tracing::warn!("⚠️  Scoring analyzer failed for {}: {}", session_id, e);
                ComponentScores { liveness: 0.0, deepfake: 0.0, emotion: 0.0 }
            }
            Err(_) => {
                tracing::warn!("⚠️  Scoring analyzer timed out for {}", session_id);
                ComponentScores { liveness: 0.0, deepfake: 0.0, emotion: 0.0 }
            }
        };

        let result = scoring::compute_from(scores);
        self.store.save_verification_result(session_id, &result).await?;
        self.audit
            .record(
                AuditEvent::VerificationResult,
                Some(session_id),
                Some(user_id),
                sonic_rs::json!({
                    "liveness_score": result.liveness_score,
                    "deepfake_score": result.deepfake_score,
                    "emotion_score": result.emotion_score,
                    "final_score": result.final_score,
                    "passed": result.passed,
                }),
            )
            .await?;

        emit(
            outbound,
            Feedback::new(FeedbackType::ScoreUpdate, "Verification scores computed", score_data(&result)),
        )
        .await;

        if !result.passed {
            self.sessions
                .terminate(session_id, TerminationReason::ScoreBelowThreshold)
                .await?;
            tracing::info!(
                "❌ Session {} failed verification with score {:.3}",
                session_id,
                result.final_score
            );
            emit(
                outbound,
                Feedback::new(
                    FeedbackType::VerificationFailed,
                    "Verification failed",
                    sonic_rs::json!({ "final_score": result.final_score }),
                ),
            )
            .await;
            return Ok(Flow::Close);
        }

        // A session closed in the meantime (sweep, timeout) never gets a credential.
        if self
            .sessions
            .terminate(session_id, TerminationReason::Completed)
            .await?
            .is_none()
        {
            return Err(AppError::SessionClosed);
        }

        let issued = self.issuer.issue(user_id, session_id, result.final_score)?;
        let expires_at = DateTime::from_timestamp(issued.expires_at, 0)
            .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?;
        let issued_at = DateTime::from_timestamp(issued.issued_at, 0)
            .ok_or_else(|| AppError::Internal("Token issue time out of range".to_string()))?;

        self.store
            .save_token(&TokenRecord {
                token_id: issued.token_id.clone(),
                user_id: user_id.to_string(),
                session_id,
                issued_at,
                expires_at,
            })
            .await?;
        self.audit
            .record(
                AuditEvent::TokenIssuance,
                Some(session_id),
                Some(user_id),
                sonic_rs::json!({
                    "token_id": issued.token_id.as_str(),
                    "expires_at": issued.expires_at,
                }),
            )
            .await?;

        tracing::info!(
            "✅ Session {} verified with score {:.3}",
            session_id,
            result.final_score
        );
        emit(
            outbound,
            Feedback::new(
                FeedbackType::VerificationSuccess,
                "Verification successful",
                sonic_rs::json!({
                    "token": issued.token.as_str(),
                    "expires_at": issued.expires_at,
                }),
            ),
        )
        .await;

        Ok(Flow::Close)
    }
}

fn score_data(result: &ScoringResult) -> sonic_rs::Value {
    sonic_rs::json!({
        "liveness_score": result.liveness_score,
        "deepfake_score": result.deepfake_score,
        "emotion_score": result.emotion_score,
        "final_score": result.final_score,
        "passed": result.passed,
        "computed_at": result.computed_at.to_rfc3339(),
    })
}

async fn emit(outbound: &mpsc::Sender<Feedback>, feedback: Feedback) {
    if outbound.send(feedback).await.is_err() {
        tracing::debug!("Client channel closed, dropping message");
    }
}
