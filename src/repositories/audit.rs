use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use crate::{
    error::{AppError, Result},
    models::audit::{AuditEntry, AuditQuery},
};

/// A helper function to map a `tokio_postgres::Row` to an `AuditEntry`.
fn row_to_entry(row: &Row) -> Result<AuditEntry> {
    let details: String = row.try_get("details")?;

    Ok(AuditEntry {
        log_id: row.try_get("log_id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        event_type: row.try_get("event_type")?,
        timestamp: row.try_get("timestamp")?,
        details: sonic_rs::from_str(&details)
            .map_err(|e| AppError::Serialization(format!("Invalid audit details: {}", e)))?,
    })
}

/// Appends an entry to the audit ledger.
pub async fn insert_entry(pool: &Pool, entry: &AuditEntry) -> Result<()> {
    let details = sonic_rs::to_string(&entry.details)
        .map_err(|e| AppError::Serialization(format!("Audit details serialization failed: {}", e)))?;

    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO audit_logs (log_id, session_id, user_id, event_type, timestamp, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &entry.log_id,
                &entry.session_id,
                &entry.user_id,
                &entry.event_type,
                &entry.timestamp,
                &details,
            ],
        )
        .await?;
    Ok(())
}

/// Queries the audit ledger, oldest first.
pub async fn query_entries(pool: &Pool, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
    let limit = query.limit as i64;

    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT log_id, session_id, user_id, event_type, timestamp, details
            FROM audit_logs
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
            ORDER BY timestamp ASC
            LIMIT $4
            "#,
            &[&query.user_id, &query.start, &query.end, &limit],
        )
        .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Deletes entries older than `before`.
pub async fn purge_before(pool: &Pool, before: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    let deleted = client
        .execute("DELETE FROM audit_logs WHERE timestamp < $1", &[&before])
        .await?;
    Ok(deleted)
}
