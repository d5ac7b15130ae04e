use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    state::AppState,
};

#[derive(Deserialize)]
struct ValidateTokenRequest {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
struct TokenAccepted {
    valid: bool,
    user_id: Option<String>,
    session_id: Option<String>,
    issued_at: Option<i64>,
    expires_at: Option<i64>,
}

#[derive(Serialize)]
struct TokenRejected {
    valid: bool,
    error: &'static str,
    error_code: &'static str,
}

/// Validates a previously issued credential.
///
/// Answers 200 with the decoded claims, or 401 with the rejection reason.
pub async fn validate_token(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: ValidateTokenRequest = sonic_rs::from_slice(&body)
        .map_err(|_| AppError::validation("INVALID_JSON", "Request body must be a JSON object"))?;

    let token = request
        .token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| AppError::validation("MISSING_TOKEN", "token is required"))?;

    let validation = state.issuer.validate(token.trim());

    let (status, response) = match validation.error {
        None => (
            StatusCode::OK,
            sonic_rs::to_string(&TokenAccepted {
                valid: true,
                user_id: validation.user_id,
                session_id: validation.session_id,
                issued_at: validation.issued_at,
                expires_at: validation.expires_at,
            }),
        ),
        Some(error) => (
            StatusCode::UNAUTHORIZED,
            sonic_rs::to_string(&TokenRejected {
                valid: false,
                error: error.message(),
                error_code: error.as_str(),
            }),
        ),
    };

    let response = response.map_err(|e| AppError::Serialization(e.to_string()))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], response).into_response())
}
