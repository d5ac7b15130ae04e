use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::feedback::Feedback,
    state::AppState,
    validation::verify::{StartVerificationRequest, validate_start_request},
};

/// Buffered messages per direction on a verification channel.
const CHANNEL_CAPACITY: usize = 64;
/// Largest inbound message: one base64 frame at the decoded size cap plus envelope.
const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Starts a verification session for an authenticated user.
pub async fn start_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let payload: StartVerificationRequest = sonic_rs::from_slice(&body)
        .map_err(|_| AppError::validation("INVALID_JSON", "Request body must be a JSON object"))?;
    validate_start_request(&payload)?;

    let session = state.sessions.create(&payload.user_id).await?;
    let websocket_url = format!(
        "{}/ws/verify/{}",
        websocket_base(&state, &headers),
        session.session_id
    );

    let response = sonic_rs::to_string(&sonic_rs::json!({
        "session_id": session.session_id.to_string(),
        "websocket_url": websocket_url,
        "message": "Session created successfully",
    }))
    .map_err(|e| AppError::Serialization(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        response,
    )
        .into_response())
}

fn websocket_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.config.public_ws_base {
        return base.trim_end_matches('/').to_string();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.bind_addr.to_string());
    format!("ws://{}", host)
}

/// Upgrades to the verification channel of a session.
pub async fn verification_channel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Bridges the socket to the orchestrator.
///
/// A reader task forwards text frames inbound, a writer task serializes
/// feedback outbound. The socket is closed once the orchestrator returns.
async fn handle_socket(socket: WebSocket, state: AppState, raw_session_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Ok(session_id) = Uuid::parse_str(&raw_session_id) else {
        let e = AppError::SessionNotFound;
        if let Ok(text) = sonic_rs::to_string(&Feedback::error(e.code(), e.public_message())) {
            let _ = ws_sender.send(Message::Text(text.into())).await;
        }
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    };

    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Feedback>(CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(feedback) = outbound_rx.recv().await {
            let text = match sonic_rs::to_string(&feedback) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("❌ Failed to serialize feedback: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    state
        .orchestrator
        .run(session_id, inbound_rx, outbound_tx)
        .await;

    reader.abort();
    let _ = writer.await;
    tracing::debug!("Verification channel for {} closed", session_id);
}
