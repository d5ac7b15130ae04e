use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;
use crate::{
    error::{AppError, Result},
    models::session::Session,
};

/// Set holding the ids of every session that is still active.
const ACTIVE_SET: &str = "sessions:active";

fn session_key(session_id: Uuid) -> String {
    format!("session:{}", session_id)
}

fn encode(session: &Session) -> Result<String> {
    sonic_rs::to_string(session)
        .map_err(|e| AppError::Serialization(format!("Session serialization failed: {}", e)))
}

/// Persists a new session and registers it as active.
pub async fn create_session(redis: &mut ConnectionManager, session: &Session) -> Result<()> {
    let json = encode(session)?;

    let _: () = redis::pipe()
        .atomic()
        .set(session_key(session.session_id), &json)
        .sadd(ACTIVE_SET, session.session_id.to_string())
        .query_async(redis)
        .await?;

    Ok(())
}

/// Finds a session by its ID.
pub async fn find_by_id(redis: &mut ConnectionManager, session_id: Uuid) -> Result<Option<Session>> {
    let json: Option<String> = redis.get(session_key(session_id)).await?;

    json.map(|raw| {
        sonic_rs::from_str(&raw)
            .map_err(|e| AppError::Serialization(format!("Invalid session JSON: {}", e)))
    })
    .transpose()
}

/// Overwrites a session, dropping it from the active set once it is terminal.
pub async fn update_session(redis: &mut ConnectionManager, session: &Session) -> Result<()> {
    let json = encode(session)?;
    let mut pipe = redis::pipe();
    pipe.atomic().set(session_key(session.session_id), &json);

    if session.status.is_terminal() {
        pipe.srem(ACTIVE_SET, session.session_id.to_string());
    }

    let _: () = pipe.query_async(redis).await?;
    Ok(())
}

/// Lists every active session.
pub async fn list_active(redis: &mut ConnectionManager) -> Result<Vec<Session>> {
    let ids: Vec<String> = redis.smembers(ACTIVE_SET).await?;
    let mut sessions = Vec::with_capacity(ids.len());

    for id in ids {
        let Ok(session_id) = Uuid::parse_str(&id) else {
            tracing::warn!("⚠️  Dropping malformed id from active set: {}", id);
            let _: () = redis.srem(ACTIVE_SET, &id).await?;
            continue;
        };

        match find_by_id(redis, session_id).await? {
            Some(session) if session.is_active() => sessions.push(session),
            _ => {
                let _: () = redis.srem(ACTIVE_SET, &id).await?;
            }
        }
    }

    Ok(sessions)
}
