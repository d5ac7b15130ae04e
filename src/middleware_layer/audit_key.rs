use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

/// Header carrying the audit API key.
pub const AUDIT_KEY_HEADER: &str = "x-audit-key";

/// A middleware that guards the audit endpoints with a shared key.
///
/// The key is compared in constant time. Without a configured key the
/// endpoints stay closed.
pub async fn require_audit_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.audit_api_key.as_ref() else {
        tracing::warn!("❌ Audit: endpoint disabled, AUDIT_API_KEY not set");
        return AppError::Unauthorized.into_response();
    };

    let presented = match req.headers().get(AUDIT_KEY_HEADER) {
        Some(value) => value.as_bytes(),
        None => {
            tracing::warn!("❌ Audit: header {} missing", AUDIT_KEY_HEADER);
            return AppError::Unauthorized.into_response();
        }
    };

    if !bool::from(presented.ct_eq(expected.as_bytes())) {
        tracing::warn!("❌ Audit: key mismatch");
        return AppError::Unauthorized.into_response();
    }

    next.run(req).await
}
