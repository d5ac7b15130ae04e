use std::sync::Arc;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::nonce::NonceRecord,
    repositories::store::Store,
};

/// Records issued nonces so replays can be detected.
///
/// A nonce counts as used for as long as its record exists. Expiry only
/// decides when [`NonceStore::purge_expired`] may remove it.
#[derive(Clone)]
pub struct NonceStore {
    store: Arc<dyn Store>,
}

impl NonceStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn store(&self, nonce: &str, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        self.store
            .store_nonce(&NonceRecord {
                nonce: nonce.to_string(),
                session_id,
                expires_at,
            })
            .await
    }

    pub async fn is_used(&self, nonce: &str) -> Result<bool> {
        self.store.nonce_exists(nonce).await
    }

    /// Records a nonce that must not have been seen before.
    ///
    /// # Errors
    ///
    /// `ReplayDetected` if the nonce is already on record.
    pub async fn claim(&self, nonce: &str, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        if self.is_used(nonce).await? {
            tracing::warn!("🚨 Nonce reuse detected for session {}", session_id);
            return Err(AppError::ReplayDetected);
        }
        self.store(nonce, session_id, expires_at).await
    }

    /// Removes records whose expiry is at or before `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store.purge_nonces(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::nonce::generate_nonce;
    use crate::repositories::memory::MemoryStore;
    use chrono::Duration;

    fn nonces() -> NonceStore {
        NonceStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn stored_nonce_is_used() {
        let nonces = nonces();
        let nonce = generate_nonce();

        assert!(!nonces.is_used(&nonce).await.unwrap());
        nonces
            .store(&nonce, Uuid::new_v4(), Utc::now() + Duration::hours(24))
            .await
            .unwrap();
        assert!(nonces.is_used(&nonce).await.unwrap());
        assert!(!nonces.is_used(&generate_nonce()).await.unwrap());
    }

    #[tokio::test]
    async fn expired_nonce_stays_used_until_purged() {
        let nonces = nonces();
        let nonce = generate_nonce();
        let now = Utc::now();
        nonces
            .store(&nonce, Uuid::new_v4(), now - Duration::seconds(1))
            .await
            .unwrap();

        assert!(nonces.is_used(&nonce).await.unwrap());
        assert_eq!(nonces.purge_expired(now).await.unwrap(), 1);
        assert!(!nonces.is_used(&nonce).await.unwrap());
    }

    #[tokio::test]
    async fn purge_keeps_live_nonces() {
        let nonces = nonces();
        let now = Utc::now();
        let live = generate_nonce();
        let stale = generate_nonce();
        let session_id = Uuid::new_v4();
        nonces.store(&live, session_id, now + Duration::hours(1)).await.unwrap();
        nonces.store(&stale, session_id, now - Duration::hours(1)).await.unwrap();

        assert_eq!(nonces.purge_expired(now).await.unwrap(), 1);
        assert!(nonces.is_used(&live).await.unwrap());
        assert!(!nonces.is_used(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn claim_rejects_replay() {
        let nonces = nonces();
        let nonce = generate_nonce();
        let expires = Utc::now() + Duration::hours(24);

        nonces.claim(&nonce, Uuid::new_v4(), expires).await.unwrap();
        let err = nonces.claim(&nonce, Uuid::new_v4(), expires).await.unwrap_err();
        assert!(matches!(err, AppError::ReplayDetected));
    }
}
