use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use crate::{
    error::{AppError, Result},
    models::credential::TokenRecord,
};

fn token_key(token_id: &str) -> String {
    format!("token:{}", token_id)
}

/// Records an issued token. The entry lives until the token expires.
pub async fn save_token(redis: &mut ConnectionManager, record: &TokenRecord) -> Result<()> {
    let json = sonic_rs::to_string(record)
        .map_err(|e| AppError::Serialization(format!("Token serialization failed: {}", e)))?;
    let ttl = (record.expires_at - Utc::now()).num_seconds().max(1) as u64;

    let _: () = redis.set_ex(token_key(&record.token_id), json, ttl).await?;
    Ok(())
}

/// Finds an issued token by its fingerprint.
pub async fn find_by_id(redis: &mut ConnectionManager, token_id: &str) -> Result<Option<TokenRecord>> {
    let json: Option<String> = redis.get(token_key(token_id)).await?;

    json.map(|raw| {
        sonic_rs::from_str(&raw)
            .map_err(|e| AppError::Serialization(format!("Invalid token JSON: {}", e)))
    })
    .transpose()
}
