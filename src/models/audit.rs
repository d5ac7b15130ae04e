use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of events mirrored to the audit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SessionCreated,
    ChallengeCompletion,
    SessionTerminated,
    ReplayDetected,
    VerificationResult,
    TokenIssuance,
    NoncePurge,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::SessionCreated => "session_created",
            AuditEvent::ChallengeCompletion => "challenge_completion",
            AuditEvent::SessionTerminated => "session_terminated",
            AuditEvent::ReplayDetected => "replay_detected",
            AuditEvent::VerificationResult => "verification_result",
            AuditEvent::TokenIssuance => "token_issuance",
            AuditEvent::NoncePurge => "nonce_purge",
        }
    }
}

/// One audit ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub log_id: Uuid,
    pub session_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: sonic_rs::Value,
}

/// Filter for audit queries. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl AuditEntry {
    /// Whether this entry satisfies `query` (ignoring the limit).
    pub fn matches(&self, query: &AuditQuery) -> bool {
        if let Some(user_id) = &query.user_id {
            if self.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if query.start.is_some_and(|start| self.timestamp < start) {
            return false;
        }
        if query.end.is_some_and(|end| self.timestamp > end) {
            return false;
        }
        true
    }
}
