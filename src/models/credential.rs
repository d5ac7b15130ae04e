use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by an issued credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub session_id: String,
    pub final_score: f64,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Why a token was rejected. The variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenError {
    Expired,
    BadSignature,
    Malformed,
}

impl TokenError {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenError::Expired => "EXPIRED",
            TokenError::BadSignature => "BAD_SIGNATURE",
            TokenError::Malformed => "MALFORMED",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            TokenError::Expired => "Token has expired",
            TokenError::BadSignature => "Invalid token signature",
            TokenError::Malformed => "Invalid token: malformed",
        }
    }
}

/// The outcome of validating a token. Never an error: rejections are values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenValidation {
    pub valid: bool,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub issued_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub error: Option<TokenError>,
}

impl TokenValidation {
    pub fn accepted(claims: Claims) -> Self {
        Self {
            valid: true,
            user_id: Some(claims.sub),
            session_id: Some(claims.session_id),
            issued_at: Some(claims.iat),
            expires_at: Some(claims.exp),
            error: None,
        }
    }

    pub fn rejected(error: TokenError) -> Self {
        Self {
            valid: false,
            user_id: None,
            session_id: None,
            issued_at: None,
            expires_at: None,
            error: Some(error),
        }
    }
}

/// A freshly minted token together with its timing.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Bookkeeping entry for an issued token, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub user_id: String,
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
