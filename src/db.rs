use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Maximum connections held by the audit ledger pool.
const POOL_MAX_SIZE: usize = 16;

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    cfg.url = Some(database_url.to_string());

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.pool = Some(PoolConfig {
        max_size: POOL_MAX_SIZE,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(AppError::from)
}

/// Creates the audit ledger table and its indexes if they do not exist yet.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                log_id      UUID PRIMARY KEY,
                session_id  UUID,
                user_id     TEXT,
                event_type  TEXT NOT NULL,
                timestamp   TIMESTAMPTZ NOT NULL,
                details     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS audit_logs_user_time_idx
                ON audit_logs (user_id, timestamp);
            CREATE INDEX IF NOT EXISTS audit_logs_time_idx
                ON audit_logs (timestamp);
            "#,
        )
        .await?;

    tracing::info!("✅ Audit ledger schema ready");
    Ok(())
}
