use std::sync::Arc;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::{
    error::Result,
    models::audit::{AuditEntry, AuditEvent, AuditQuery},
    repositories::store::Store,
};

/// Upper bound on entries returned by a single query.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Mirrors protocol transitions to the audit ledger.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends one event.
    ///
    /// # Arguments
    ///
    /// * `event` - The kind of event.
    /// * `session_id` - The session the event belongs to, if any.
    /// * `user_id` - The user the event belongs to, if any.
    /// * `details` - Event specific payload.
    pub async fn record(
        &self,
        event: AuditEvent,
        session_id: Option<Uuid>,
        user_id: Option<&str>,
        details: sonic_rs::Value,
    ) -> Result<()> {
        let entry = AuditEntry {
            log_id: Uuid::new_v4(),
            session_id,
            user_id: user_id.map(str::to_string),
            event_type: event.as_str().to_string(),
            timestamp: Utc::now(),
            details,
        };

        self.store.append_audit(&entry).await.inspect_err(|e| {
            tracing::error!("❌ Failed to write audit event {}: {}", event.as_str(), e);
        })
    }

    /// Retrieves audit entries, capped at [`MAX_QUERY_LIMIT`].
    pub async fn query(&self, mut query: AuditQuery) -> Result<Vec<AuditEntry>> {
        if query.limit == 0 || query.limit > MAX_QUERY_LIMIT {
            query.limit = MAX_QUERY_LIMIT;
        }
        self.store.query_audit(&query).await
    }

    /// Removes entries recorded before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store.purge_audit(cutoff).await
    }
}
