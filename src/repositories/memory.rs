use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
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
    repositories::store::Store,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    nonces: HashMap<String, NonceRecord>,
    results: HashMap<Uuid, ScoringResult>,
    tokens: HashMap<String, TokenRecord>,
    audit: Vec<AuditEntry>,
}

/// In-process store used for development and tests.
///
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(&session_id).cloned())
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn store_nonce(&self, record: &NonceRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.nonces.insert(record.nonce.clone(), record.clone());
        Ok(())
    }

    async fn nonce_exists(&self, nonce: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.nonces.contains_key(nonce))
    }

    async fn purge_nonces(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.nonces.len();
        tables.nonces.retain(|_, record| record.expires_at > now);
        Ok((before - tables.nonces.len()) as u64)
    }

    async fn save_verification_result(&self, session_id: Uuid, result: &ScoringResult) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.results.insert(session_id, result.clone());
        Ok(())
    }

    async fn get_verification_result(&self, session_id: Uuid) -> Result<Option<ScoringResult>> {
        let tables = self.tables.read().await;
        Ok(tables.results.get(&session_id).cloned())
    }

    async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.tokens.insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn get_token(&self, token_id: &str) -> Result<Option<TokenRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.tokens.get(token_id).cloned())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.audit.push(entry.clone());
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<AuditEntry> = tables
            .audit
            .iter()
            .filter(|entry| entry.matches(query))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);
        entries.truncate(query.limit);
        Ok(entries)
    }

    async fn purge_audit(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let count = tables.audit.len();
        tables.audit.retain(|entry| entry.timestamp >= before);
        Ok((count - tables.audit.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
