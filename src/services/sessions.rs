use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::VerificationPolicy,
    error::{AppError, Result},
    models::{
        audit::AuditEvent,
        challenge::{ChallengeId, ChallengeResult},
        session::{Session, TerminationReason},
    },
    repositories::store::Store,
    services::audit::AuditLog,
};

/// Owns the lifecycle of verification sessions.
///
/// All mutations of one session go through a per-session async mutex, so
/// concurrent results for the same session are applied one after another and
/// never lose a counter update. Different sessions never contend.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    audit: AuditLog,
    policy: VerificationPolicy,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SessionManager {
    /// Creates a new `SessionManager`.
    pub fn new(store: Arc<dyn Store>, audit: AuditLog, policy: VerificationPolicy) -> Self {
        Self {
            store,
            audit,
            policy,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id).or_default().clone()
    }

    /// Drops the lock entry of a session that can no longer change.
    ///
    /// Only called for unknown or terminal sessions, so a caller that races
    /// onto a fresh mutex can only observe the same closed state.
    async fn release_lock(&self, session_id: Uuid) {
        let mut locks = self.locks.lock().await;
        locks.remove(&session_id);
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Creates a new active session for an authenticated user.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The already-authenticated user.
    ///
    /// # Returns
    ///
    /// A `Result` containing the persisted `Session`.
    pub async fn create(&self, user_id: &str) -> Result<Session> {
        let session = Session::new(user_id.to_string(), Utc::now());
        self.store.create_session(&session).await?;

        self.audit
            .record(
                AuditEvent::SessionCreated,
                Some(session.session_id),
                Some(user_id),
                sonic_rs::json!({ "start_time": session.start_time.to_rfc3339() }),
            )
            .await?;

        tracing::info!("✅ Session created: {} (user {})", session.session_id, user_id);
        Ok(session)
    }

    /// Fetches a session.
    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound)
    }

    /// Folds one challenge result into the session's failure bookkeeping.
    ///
    /// A success resets the consecutive failure counter, a failure increments
    /// it. The status is never changed here. Results for a session that is no
    /// longer active are stale and rejected with `SessionClosed`.
    pub async fn record_result(&self, session_id: Uuid, result: &ChallengeResult) -> Result<Session> {
        let lock = self.lock_for(session_id).await;
        let guard = lock.lock().await;

        let Some(mut session) = self.store.get_session(session_id).await? else {
            drop(guard);
            self.release_lock(session_id).await;
            return Err(AppError::SessionNotFound);
        };

        if !session.is_active() {
            tracing::debug!(
                "Discarding stale result {} for closed session {}",
                result.challenge_id,
                session_id
            );
            drop(guard);
            self.release_lock(session_id).await;
            return Err(AppError::SessionClosed);
        }

        if result.completed {
            session.consecutive_failure_count = 0;
        } else {
            session.consecutive_failure_count = session.consecutive_failure_count.saturating_add(1);
        }

        self.store.update_session(&session).await?;

        let challenge_type = result
            .challenge_id
            .parse::<ChallengeId>()
            .map(|id| id.kind.as_str())
            .unwrap_or("unknown");

        self.audit
            .record(
                AuditEvent::ChallengeCompletion,
                Some(session_id),
                Some(&session.user_id),
                sonic_rs::json!({
                    "challenge_id": result.challenge_id.as_str(),
                    "challenge_type": challenge_type,
                    "completed": result.completed,
                    "confidence": result.confidence,
                    "consecutive_failures": session.consecutive_failure_count,
                }),
            )
            .await?;

        tracing::debug!(
            "Challenge {} for session {}: completed={} confidence={:.3}",
            result.challenge_id,
            session_id,
            result.completed,
            result.confidence
        );

        Ok(session)
    }

    /// Whether `session` has outlived the maximum duration at `now`.
    ///
    /// Compared at full clock precision: any instant past the cap is expired.
    pub fn expired_at(&self, session: &Session, now: DateTime<Utc>) -> bool {
        TimeDelta::from_std(self.policy.max_session_duration)
            .is_ok_and(|cap| now - session.start_time > cap)
    }

    /// Whether the session has run past its maximum duration.
    ///
    /// Unknown sessions, and sessions that cannot be read, count as timed out.
    pub async fn is_timed_out(&self, session_id: Uuid) -> bool {
        match self.store.get_session(session_id).await {
            Ok(Some(session)) => self.expired_at(&session, Utc::now()),
            Ok(None) => true,
            Err(e) => {
                tracing::error!("❌ Timeout check failed for session {}: {}", session_id, e);
                true
            }
        }
    }

    /// Whether the session hit the consecutive failure cap.
    ///
    /// Unknown sessions, and sessions that cannot be read, count as over the limit.
    pub async fn is_over_failure_limit(&self, session_id: Uuid) -> bool {
        match self.store.get_session(session_id).await {
            Ok(Some(session)) => {
                session.consecutive_failure_count >= self.policy.max_consecutive_failures
            }
            Ok(None) => true,
            Err(e) => {
                tracing::error!("❌ Failure limit check failed for session {}: {}", session_id, e);
                true
            }
        }
    }

    /// Moves a session into the terminal status matching `reason`.
    ///
    /// Unknown and already terminated sessions are left untouched.
    ///
    /// # Returns
    ///
    /// The terminated session, or `None` if nothing changed.
    pub async fn terminate(
        &self,
        session_id: Uuid,
        reason: TerminationReason,
    ) -> Result<Option<Session>> {
        let lock = self.lock_for(session_id).await;
        let guard = lock.lock().await;

        let Some(mut session) = self.store.get_session(session_id).await? else {
            drop(guard);
            self.release_lock(session_id).await;
            return Ok(None);
        };

        if !session.is_active() {
            drop(guard);
            self.release_lock(session_id).await;
            return Ok(None);
        }

        let now = Utc::now();
        session.status = reason.terminal_status();
        session.end_time = Some(now);
        self.store.update_session(&session).await?;

        let duration = (now - session.start_time).num_milliseconds() as f64 / 1000.0;
        self.audit
            .record(
                AuditEvent::SessionTerminated,
                Some(session_id),
                Some(&session.user_id),
                sonic_rs::json!({
                    "reason": reason.as_str(),
                    "status": session.status.as_str(),
                    "duration": duration,
                }),
            )
            .await?;

        drop(guard);
        self.release_lock(session_id).await;

        tracing::info!(
            "🔒 Session {} terminated: {} after {:.1}s",
            session_id,
            reason.as_str(),
            duration
        );
        Ok(Some(session))
    }

    /// Terminates every active session that ran past its maximum duration.
    ///
    /// # Returns
    ///
    /// The number of sessions terminated.
    pub async fn sweep_timeouts(&self) -> Result<usize> {
        let now = Utc::now();
        let mut terminated = 0;

        for session in self.store.active_sessions().await? {
            if !self.expired_at(&session, now) {
                continue;
            }
            match self.terminate(session.session_id, TerminationReason::Timeout).await {
                Ok(Some(_)) => terminated += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        "❌ Failed to time out session {}: {}",
                        session.session_id,
                        e
                    );
                }
            }
        }

        Ok(terminated)
    }
}
