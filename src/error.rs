use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The session does not exist. Callers treat it as already terminated.
    #[error("Session not found")]
    SessionNotFound,

    /// The session is in a terminal state; the operation is stale.
    #[error("Session is closed")]
    SessionClosed,

    /// A nonce was presented or generated that is already on record.
    #[error("Replay detected")]
    ReplayDetected,

    /// A nonce that was never issued for this channel.
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// The session exceeded its maximum duration.
    #[error("Session timed out")]
    SessionTimeout,

    /// Too many consecutive failed challenges.
    #[error("Consecutive failure limit exceeded")]
    FailureLimitExceeded,

    /// A validation error with a stable machine-readable code.
    #[error("Validation error: {message}")]
    Validation { code: &'static str, message: String },

    /// The request is missing credentials or presented the wrong ones.
    #[error("Authorization failed")]
    Unauthorized,

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A database pool error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A database pool construction error.
    #[error("Database pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A key handling or signing error.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The analyzer collaborator failed or is unavailable.
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Shorthand for a validation error.
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    /// The machine-readable code shown to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SessionNotFound => "INVALID_SESSION",
            AppError::SessionClosed => "SESSION_CLOSED",
            AppError::ReplayDetected => "REPLAY_DETECTED",
            AppError::NonceMismatch => "NONCE_MISMATCH",
            AppError::SessionTimeout => "SESSION_TIMEOUT",
            AppError::FailureLimitExceeded => "MAX_FAILURES",
            AppError::Validation { code, .. } => *code,
            AppError::Unauthorized => "UNAUTHORIZED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// The message shown to clients. Infrastructure detail is never included.
    pub fn public_message(&self) -> String {
        match self {
            AppError::SessionNotFound => "Invalid session".to_string(),
            AppError::Validation { message, .. } => message.clone(),
            AppError::Redis(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Signing(_)
            | AppError::Analyzer(_)
            | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::SessionNotFound => StatusCode::NOT_FOUND,
            AppError::SessionClosed
            | AppError::SessionTimeout
            | AppError::FailureLimitExceeded => StatusCode::GONE,
            AppError::ReplayDetected | AppError::NonceMismatch => StatusCode::CONFLICT,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Validation { message, .. } => {
                tracing::debug!("Validation error: {}", message);
            }
            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
            }
            AppError::ReplayDetected | AppError::NonceMismatch => {
                tracing::warn!("Security violation: {}", self);
            }
            e if status.is_server_error() => {
                tracing::error!("{}", e);
            }
            e => {
                tracing::debug!("{}", e);
            }
        }

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        }))
        .unwrap_or_else(|_| {
            r#"{"error":{"code":"INTERNAL_ERROR","message":"Internal server error"}}"#.to_string()
        });

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
