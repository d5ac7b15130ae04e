use std::sync::Arc;
use redis::aio::ConnectionManager;
use crate::config::Config;
use crate::error::Result;
use crate::repositories::{memory::MemoryStore, store::{LiveStore, Store}};
use crate::services::{
    analyzer::{AnalyzerLimiter, FrameAnalyzer, RemoteAnalyzer, UnavailableAnalyzer},
    audit::AuditLog,
    challenges::ChallengeGenerator,
    credentials::CredentialIssuer,
    nonces::NonceStore,
    orchestrator::VerificationOrchestrator,
    sessions::SessionManager,
    sweep::Sweeper,
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Durable storage for sessions, nonces, results, tokens and the audit ledger.
    pub store: Arc<dyn Store>,
    /// The session state machine.
    pub sessions: SessionManager,
    /// The audit ledger.
    pub audit: AuditLog,
    /// Signs and validates credentials.
    pub issuer: Arc<CredentialIssuer>,
    /// Drives verification channels.
    pub orchestrator: VerificationOrchestrator,
    /// Background housekeeping.
    pub sweeper: Sweeper,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store: Arc<dyn Store> = match (&config.redis_url, &config.database_url) {
            (Some(redis_url), Some(database_url)) => {
                let db = crate::db::create_pool(database_url)?;
                crate::db::ensure_schema(&db).await?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

                let redis_client = redis::Client::open(redis_url.as_str())?;
                let redis = ConnectionManager::new(redis_client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (pooled)");

                Arc::new(LiveStore::new(redis, db))
            }
            _ => {
                tracing::warn!("⚠️  REDIS_URL or DATABASE_URL not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let issuer = CredentialIssuer::load_or_generate(
            &config.private_key_path,
            &config.public_key_path,
        )
        .await?;
        tracing::info!("✅ Credential issuer initialized");

        let analyzer: Arc<dyn FrameAnalyzer> = match &config.analyzer_url {
            Some(url) => {
                let limiter = AnalyzerLimiter::new(config.analyzer_concurrency);
                tracing::info!(
                    "✅ Remote analyzer at {} (max {} concurrent calls)",
                    url,
                    config.analyzer_concurrency
                );
                Arc::new(RemoteAnalyzer::new(url, config.policy.challenge_timeout, limiter)?)
            }
            None => {
                tracing::warn!("⚠️  ANALYZER_URL not set, every challenge will fail");
                Arc::new(UnavailableAnalyzer)
            }
        };

        Ok(Self::from_parts(config.clone(), store, Arc::new(issuer), analyzer))
    }

    /// Wires the services around already constructed collaborators.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn Store>,
        issuer: Arc<CredentialIssuer>,
        analyzer: Arc<dyn FrameAnalyzer>,
    ) -> Self {
        let policy = config.policy.clone();
        let audit = AuditLog::new(store.clone());
        let sessions = SessionManager::new(store.clone(), audit.clone(), policy.clone());
        let nonces = NonceStore::new(store.clone());
        let challenges = ChallengeGenerator::new(policy.challenge_timeout);

        let orchestrator = VerificationOrchestrator::new(
            sessions.clone(),
            challenges,
            nonces.clone(),
            issuer.clone(),
            analyzer,
            store.clone(),
            audit.clone(),
            policy.clone(),
        );
        let sweeper = Sweeper::new(sessions.clone(), nonces, audit.clone(), policy);

        Self {
            config,
            store,
            sessions,
            audit,
            issuer,
            orchestrator,
            sweeper,
        }
    }
}
