use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use axum::body::Bytes;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{
    error::{AppError, Result},
    models::{challenge::Challenge, scoring::ComponentScores},
};

/// Largest accepted decoded frame.
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

const ACCEPTED_FRAME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub mime: &'static str,
    pub received_at: DateTime<Utc>,
}

/// Decodes a frame as sent by the client: base64, optionally wrapped in a
/// `data:` URL. The payload must be a JPEG, PNG or WebP image.
pub fn decode_frame(raw: &str, received_at: DateTime<Utc>) -> Result<Frame> {
    let encoded = match raw.strip_prefix("data:") {
        Some(url) => url
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| AppError::validation("INVALID_FRAME", "Malformed data URL"))?,
        None => raw,
    };
    let encoded = encoded.trim();

    if encoded.is_empty() {
        return Err(AppError::validation("INVALID_FRAME", "Empty frame"));
    }
    // Reject oversized payloads before allocating for them.
    if encoded.len() > MAX_FRAME_BYTES.div_ceil(3) * 4 {
        return Err(AppError::validation("INVALID_FRAME", "Frame too large"));
    }

    let data = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| AppError::validation("INVALID_FRAME", "Frame is not valid base64"))?;

    if data.len() > MAX_FRAME_BYTES {
        return Err(AppError::validation("INVALID_FRAME", "Frame too large"));
    }

    let mime = infer::get(&data)
        .map(|kind| kind.mime_type())
        .filter(|mime| ACCEPTED_FRAME_TYPES.contains(mime))
        .ok_or_else(|| AppError::validation("INVALID_FRAME", "Frame is not a supported image"))?;

    Ok(Frame {
        data: Bytes::from(data),
        mime,
        received_at,
    })
}

/// Whether the subject performed a challenge, and how sure the analyzer is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChallengeVerdict {
    pub completed: bool,
    pub confidence: f64,
}

impl ChallengeVerdict {
    pub fn clamped(self) -> Self {
        Self {
            completed: self.completed,
            confidence: if self.confidence.is_nan() {
                0.0
            } else {
                self.confidence.clamp(0.0, 1.0)
            },
        }
    }
}

/// The computer vision collaborators behind the protocol.
#[async_trait]
pub trait FrameAnalyzer: Send + Sync {
    /// Judges whether `frames` show the action `challenge` asks for.
    async fn verify_challenge(&self, frames: &[Frame], challenge: &Challenge) -> Result<ChallengeVerdict>;

    /// Scores a sample of the session's frames.
    async fn analyze(&self, frames: &[Frame]) -> Result<ComponentScores>;
}

/// Bounds the number of analyzer calls in flight.
#[derive(Clone)]
pub struct AnalyzerLimiter {
    semaphore: Arc<Semaphore>,
}

impl AnalyzerLimiter {
    /// Creates a new `AnalyzerLimiter`.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Acquires a permit from the semaphore.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AppError::Analyzer("Analyzer limiter closed".to_string()))
    }

    /// Returns the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[derive(Serialize)]
struct ChallengeRequest<'a> {
    challenge_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    action: &'a str,
    frames: Vec<String>,
}

#[derive(Serialize)]
struct ScoresRequest {
    frames: Vec<String>,
}

#[derive(Deserialize)]
struct ScoresResponse {
    liveness: f64,
    deepfake: f64,
    emotion: f64,
}

/// Analyzer service reached over HTTP.
///
/// `POST {base}/challenge` answers `{completed, confidence}`,
/// `POST {base}/scores` answers `{liveness, deepfake, emotion}`.
pub struct RemoteAnalyzer {
    http: reqwest::Client,
    base_url: String,
    limiter: AnalyzerLimiter,
}

impl RemoteAnalyzer {
    /// Creates a new `RemoteAnalyzer`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Where the analyzer service listens.
    /// * `timeout` - Upper bound on one analyzer call.
    /// * `limiter` - Shared bound on concurrent calls.
    pub fn new(base_url: &str, timeout: Duration, limiter: AnalyzerLimiter) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| AppError::Analyzer(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    async fn post<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let payload = sonic_rs::to_vec(body).map_err(|e| AppError::Serialization(e.to_string()))?;
        let _permit = self.limiter.acquire().await?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| AppError::Analyzer(format!("Request to {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Analyzer(format!(
                "{} returned HTTP {}",
                path,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Analyzer(format!("Failed to read {} response: {}", path, e)))?;

        sonic_rs::from_slice(&bytes)
            .map_err(|e| AppError::Analyzer(format!("Invalid {} response: {}", path, e)))
    }
}

fn encode_frames(frames: &[Frame]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| general_purpose::STANDARD.encode(&frame.data))
        .collect()
}

#[async_trait]
impl FrameAnalyzer for RemoteAnalyzer {
    async fn verify_challenge(&self, frames: &[Frame], challenge: &Challenge) -> Result<ChallengeVerdict> {
        let id = challenge
            .parsed_id()
            .ok_or_else(|| AppError::Internal(format!("Unparseable challenge id {}", challenge.challenge_id)))?;

        let verdict: ChallengeVerdict = self
            .post(
                "/challenge",
                &ChallengeRequest {
                    challenge_id: &challenge.challenge_id,
                    kind: challenge.kind.as_str(),
                    action: id.action,
                    frames: encode_frames(frames),
                },
            )
            .await?;

        Ok(verdict.clamped())
    }

    async fn analyze(&self, frames: &[Frame]) -> Result<ComponentScores> {
        let scores: ScoresResponse = self
            .post(
                "/scores",
                &ScoresRequest {
                    frames: encode_frames(frames),
                },
            )
            .await?;

        Ok(ComponentScores {
            liveness: scores.liveness,
            deepfake: scores.deepfake,
            emotion: scores.emotion,
        }
        .clamped())
    }
}

/// Stand-in used when no analyzer is configured. Every call fails, so no
/// challenge can succeed and no credential can be issued.
pub struct UnavailableAnalyzer;

#[async_trait]
impl FrameAnalyzer for UnavailableAnalyzer {
    async fn verify_challenge(&self, _frames: &[Frame], _challenge: &Challenge) -> Result<ChallengeVerdict> {
        Err(AppError::Analyzer("No analyzer configured".to_string()))
    }

    async fn analyze(&self, _frames: &[Frame]) -> Result<ComponentScores> {
        Err(AppError::Analyzer("No analyzer configured".to_string()))
    }
}
