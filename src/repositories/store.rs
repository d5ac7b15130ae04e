use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        audit::{AuditEntry, AuditQuery},
        credential::TokenRecord,
        nonce::NonceRecord,
        scoring::ScoringResult,
        session::Session,
    },
    repositories::{audit as audit_repo, nonce as nonce_repo, result as result_repo,
        session as session_repo, token as token_repo},
};

/// The durable store behind the verification core.
///
/// Every method is safe to call concurrently. Per-session atomicity of
/// read-modify-write sequences is provided by the session state machine,
/// not by the store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;
    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    /// All sessions whose status is still `Active`.
    async fn active_sessions(&self) -> Result<Vec<Session>>;

    async fn store_nonce(&self, record: &NonceRecord) -> Result<()>;
    /// Whether a record for `nonce` exists. Expiry is not consulted.
    async fn nonce_exists(&self, nonce: &str) -> Result<bool>;
    /// Deletes records whose `expires_at` is at or before `now`.
    async fn purge_nonces(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn save_verification_result(&self, session_id: Uuid, result: &ScoringResult) -> Result<()>;
    async fn get_verification_result(&self, session_id: Uuid) -> Result<Option<ScoringResult>>;

    async fn save_token(&self, record: &TokenRecord) -> Result<()>;
    async fn get_token(&self, token_id: &str) -> Result<Option<TokenRecord>>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    /// Matching entries in chronological order, at most `query.limit`.
    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>>;
    /// Deletes entries older than `before`.
    async fn purge_audit(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Cheap liveness probe of the backing services.
    async fn ping(&self) -> Result<()>;
}

/// Production store: Redis for the hot protocol state, PostgreSQL for the audit ledger.
#[derive(Clone)]
pub struct LiveStore {
    redis: ConnectionManager,
    db: Pool,
}

impl LiveStore {
    pub fn new(redis: ConnectionManager, db: Pool) -> Self {
        Self { redis, db }
    }
}

#[async_trait]
impl Store for LiveStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        session_repo::create_session(&mut self.redis.clone(), session).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        session_repo::find_by_id(&mut self.redis.clone(), session_id).await
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        session_repo::update_session(&mut self.redis.clone(), session).await
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        session_repo::list_active(&mut self.redis.clone()).await
    }

    async fn store_nonce(&self, record: &NonceRecord) -> Result<()> {
        nonce_repo::store_nonce(&mut self.redis.clone(), record).await
    }

    async fn nonce_exists(&self, nonce: &str) -> Result<bool> {
        nonce_repo::exists(&mut self.redis.clone(), nonce).await
    }

    async fn purge_nonces(&self, now: DateTime<Utc>) -> Result<u64> {
        nonce_repo::purge_expired(&mut self.redis.clone(), now).await
    }

    async fn save_verification_result(&self, session_id: Uuid, result: &ScoringResult) -> Result<()> {
        result_repo::save_result(&mut self.redis.clone(), session_id, result).await
    }

    async fn get_verification_result(&self, session_id: Uuid) -> Result<Option<ScoringResult>> {
        result_repo::find_by_session(&mut self.redis.clone(), session_id).await
    }

    async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        token_repo::save_token(&mut self.redis.clone(), record).await
    }

    async fn get_token(&self, token_id: &str) -> Result<Option<TokenRecord>> {
        token_repo::find_by_id(&mut self.redis.clone(), token_id).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        audit_repo::insert_entry(&self.db, entry).await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        audit_repo::query_entries(&self.db, query).await
    }

    async fn purge_audit(&self, before: DateTime<Utc>) -> Result<u64> {
        audit_repo::purge_before(&self.db, before).await
    }

    async fn ping(&self) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.redis.clone())
            .await?;
        let client = self.db.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}
