use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;
use crate::{
    error::{AppError, Result},
    models::scoring::ScoringResult,
};

fn result_key(session_id: Uuid) -> String {
    format!("verification_result:{}", session_id)
}

/// Stores the decision for a session.
pub async fn save_result(
    redis: &mut ConnectionManager,
    session_id: Uuid,
    result: &ScoringResult,
) -> Result<()> {
    let json = sonic_rs::to_string(result)
        .map_err(|e| AppError::Serialization(format!("Result serialization failed: {}", e)))?;
    let _: () = redis.set(result_key(session_id), json).await?;
    Ok(())
}

/// Finds the decision for a session.
pub async fn find_by_session(
    redis: &mut ConnectionManager,
    session_id: Uuid,
) -> Result<Option<ScoringResult>> {
    let json: Option<String> = redis.get(result_key(session_id)).await?;

    json.map(|raw| {
        sonic_rs::from_str(&raw)
            .map_err(|e| AppError::Serialization(format!("Invalid result JSON: {}", e)))
    })
    .transpose()
}
