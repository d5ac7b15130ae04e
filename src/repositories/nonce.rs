use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use crate::{error::Result, models::nonce::NonceRecord};

/// Sorted set of nonces scored by their expiry (unix milliseconds).
const EXPIRY_INDEX: &str = "nonces:expiry";

fn nonce_key(nonce: &str) -> String {
    format!("nonce:{}", nonce)
}

fn expiry_score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Records a nonce together with its owning session.
///
/// No Redis TTL is set: a nonce stays "used" until `purge_expired` removes it.
pub async fn store_nonce(redis: &mut ConnectionManager, record: &NonceRecord) -> Result<()> {
    let _: () = redis::pipe()
        .atomic()
        .set(nonce_key(&record.nonce), record.session_id.to_string())
        .zadd(EXPIRY_INDEX, &record.nonce, expiry_score(record.expires_at))
        .query_async(redis)
        .await?;

    Ok(())
}

/// Checks whether a nonce is on record.
pub async fn exists(redis: &mut ConnectionManager, nonce: &str) -> Result<bool> {
    let found: bool = redis.exists(nonce_key(nonce)).await?;
    Ok(found)
}

/// Deletes every nonce that expired at or before `now`.
///
/// # Returns
///
/// The number of nonces removed.
pub async fn purge_expired(redis: &mut ConnectionManager, now: DateTime<Utc>) -> Result<u64> {
    let expired: Vec<String> = redis
        .zrangebyscore(EXPIRY_INDEX, "-inf", expiry_score(now))
        .await?;

    if expired.is_empty() {
        return Ok(0);
    }

    let keys: Vec<String> = expired.iter().map(|n| nonce_key(n)).collect();
    let _: () = redis::pipe()
        .atomic()
        .del(keys)
        .zrem(EXPIRY_INDEX, &expired)
        .query_async(redis)
        .await?;

    Ok(expired.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn expiry_score_keeps_sub_second_order() {
        let now = Utc::now();
        let later = now + TimeDelta::milliseconds(400);

        assert!(expiry_score(later) > expiry_score(now));
        assert_eq!(expiry_score(later) - expiry_score(now), 400);
    }
}
