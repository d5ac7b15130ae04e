use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A nonce that has been handed out. It counts as used for as long as the
/// record exists, whether or not `expires_at` has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub nonce: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
