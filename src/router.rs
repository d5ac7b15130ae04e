use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Request bodies on the HTTP API are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Session creation. Rate limited per peer by the binary.
pub fn session_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/verify", post(handlers::verify::start_verification))
        .with_state(state)
}

/// Everything except session creation.
pub fn public_routes(state: AppState) -> Router {
    let audit_routes = Router::new()
        .route("/api/audit", get(handlers::audit::query_audit))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::audit_key::require_audit_key,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route("/api/auth/validate", post(handlers::token::validate_token))
        .route(
            "/ws/verify/{session_id}",
            get(handlers::verify::verification_channel),
        )
        .with_state(state)
        .merge(audit_routes)
}

/// Adds tracing and the body limit to an assembled router.
pub fn with_common_layers(router: Router) -> Router {
    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// The full API without per-peer rate limiting.
pub fn build_router(state: AppState) -> Router {
    with_common_layers(
        Router::new()
            .merge(session_routes(state.clone()))
            .merge(public_routes(state)),
    )
}
