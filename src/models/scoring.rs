use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Component scores as produced by the analyzers, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub liveness: f64,
    pub deepfake: f64,
    pub emotion: f64,
}

impl ComponentScores {
    /// Clamps every component into [0, 1]; NaN becomes 0.
    pub fn clamped(self) -> Self {
        fn clamp(v: f64) -> f64 {
            if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
        }

        Self {
            liveness: clamp(self.liveness),
            deepfake: clamp(self.deepfake),
            emotion: clamp(self.emotion),
        }
    }
}

/// The aggregated verification decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub liveness_score: f64,
    pub deepfake_score: f64,
    pub emotion_score: f64,
    pub final_score: f64,
    pub passed: bool,
    pub computed_at: DateTime<Utc>,
}
