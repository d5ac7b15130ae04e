use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a verification session.
///
/// `Active` is the only non-terminal state. Once a session leaves it, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Timeout,
}

impl SessionStatus {
    /// Returns `true` for every status other than `Active`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Timeout => "timeout",
        }
    }
}

/// Why a session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Timeout,
    MaxFailures,
    Completed,
    SecurityViolation,
    /// All challenges succeeded but the aggregated score missed the threshold.
    ScoreBelowThreshold,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Timeout => "timeout",
            TerminationReason::MaxFailures => "max_failures",
            TerminationReason::Completed => "completed",
            TerminationReason::SecurityViolation => "security_violation",
            TerminationReason::ScoreBelowThreshold => "score_below_threshold",
        }
    }

    /// The terminal status a session moves to for this reason.
    pub fn terminal_status(self) -> SessionStatus {
        match self {
            TerminationReason::Timeout => SessionStatus::Timeout,
            TerminationReason::MaxFailures => SessionStatus::Failed,
            TerminationReason::Completed => SessionStatus::Completed,
            TerminationReason::SecurityViolation => SessionStatus::Failed,
            TerminationReason::ScoreBelowThreshold => SessionStatus::Failed,
        }
    }
}

/// One verification attempt for an authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The unique identifier of the session.
    pub session_id: Uuid,
    /// The already-authenticated user the attempt belongs to.
    pub user_id: String,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// When the session reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// The current lifecycle status.
    pub status: SessionStatus,
    /// Failed challenges since the last success.
    pub consecutive_failure_count: u32,
}

impl Session {
    /// Creates a fresh `Active` session starting at `now`.
    pub fn new(user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            start_time: now,
            end_time: None,
            status: SessionStatus::Active,
            consecutive_failure_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}
