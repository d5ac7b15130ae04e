use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Service banner.
pub async fn root() -> Response {
    let body = sonic_rs::json!({
        "message": "Proof of Life Authentication API",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
    });
    json_response(StatusCode::OK, &body)
}

/// Liveness of the API and reachability of the store.
pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::error!("❌ Health check: store unreachable: {}", e);
            "disconnected"
        }
    };

    let (status, overall) = if database == "connected" {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = sonic_rs::json!({
        "status": overall,
        "services": {
            "api": "running",
            "database": database,
        },
    });
    json_response(status, &body)
}

fn json_response(status: StatusCode, body: &sonic_rs::Value) -> Response {
    match sonic_rs::to_string(body) {
        Ok(text) => (status, [(header::CONTENT_TYPE, "application/json")], text).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
