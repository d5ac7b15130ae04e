use serde::{Deserialize, Serialize};

/// Messages a client sends over the verification channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One base64 encoded video frame, optionally as a data URL.
    VideoFrame { frame: String },
    /// The client believes the current challenge has been performed.
    ChallengeComplete {
        challenge_id: String,
        nonce: Option<String>,
    },
}

/// Type tag of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    ChallengeIssued,
    ChallengeCompleted,
    ChallengeFailed,
    ScoreUpdate,
    VerificationSuccess,
    VerificationFailed,
    Error,
}

/// A message the server sends over the verification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: FeedbackType,
    pub message: String,
    pub data: sonic_rs::Value,
}

impl Feedback {
    pub fn new(kind: FeedbackType, message: impl Into<String>, data: sonic_rs::Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data,
        }
    }

    /// An `error` message carrying only a machine-readable code.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            FeedbackType::Error,
            message,
            sonic_rs::json!({ "code": code }),
        )
    }
}
