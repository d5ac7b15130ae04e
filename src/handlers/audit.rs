use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::audit::{AuditEntry, AuditQuery},
    services::audit::MAX_QUERY_LIMIT,
    state::AppState,
};

/// Query string of the audit endpoint. Times are RFC 3339.
#[derive(Deserialize, Debug)]
pub struct AuditParams {
    pub user_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct AuditResponse {
    count: usize,
    entries: Vec<AuditEntry>,
}

fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| AppError::validation("INVALID_QUERY", format!("{} must be an RFC 3339 timestamp", field)))
    })
    .transpose()
}

/// Lists audit entries, oldest first.
pub async fn query_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Response> {
    let query = AuditQuery {
        user_id: params.user_id.filter(|id| !id.is_empty()),
        start: parse_time("start", params.start.as_deref())?,
        end: parse_time("end", params.end.as_deref())?,
        limit: params.limit.unwrap_or(100).min(MAX_QUERY_LIMIT),
    };

    if let (Some(start), Some(end)) = (query.start, query.end) {
        if start > end {
            return Err(AppError::validation("INVALID_QUERY", "start must not be after end"));
        }
    }

    let entries = state.audit.query(query).await?;
    tracing::debug!("Audit query returned {} entries", entries.len());

    let response = sonic_rs::to_string(&AuditResponse {
        count: entries.len(),
        entries,
    })
    .map_err(|e| AppError::Serialization(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
        .into_response())
}
