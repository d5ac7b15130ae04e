use chrono::Utc;
use crate::models::scoring::{ComponentScores, ScoringResult};

/// Weight of the liveness component.
pub const LIVENESS_WEIGHT: f64 = 0.4;
/// Weight of the deepfake (authenticity) component.
pub const DEEPFAKE_WEIGHT: f64 = 0.3;
/// Weight of the emotion component.
pub const EMOTION_WEIGHT: f64 = 0.3;
/// Inclusive pass threshold on the final score.
pub const PASS_THRESHOLD: f64 = 0.70;

/// Combines component scores into a single pass/fail decision.
///
/// The final score is rounded to 1e-9 before comparison so that inputs such
/// as `(0.7, 0.7, 0.7)` land exactly on the threshold instead of a hair below
/// it through floating point error.
pub fn compute(liveness: f64, deepfake: f64, emotion: f64) -> ScoringResult {
    let raw = LIVENESS_WEIGHT * liveness + DEEPFAKE_WEIGHT * deepfake + EMOTION_WEIGHT * emotion;
    let final_score = (raw * 1e9).round() / 1e9;

    ScoringResult {
        liveness_score: liveness,
        deepfake_score: deepfake,
        emotion_score: emotion,
        final_score,
        passed: final_score >= PASS_THRESHOLD,
        computed_at: Utc::now(),
    }
}

/// [`compute`] over a bundle of analyzer scores.
pub fn compute_from(scores: ComponentScores) -> ScoringResult {
    compute(scores.liveness, scores.deepfake, scores.emotion)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn weights_sum_to_one() {
        assert!((LIVENESS_WEIGHT + DEEPFAKE_WEIGHT + EMOTION_WEIGHT - 1.0).abs() < EPS);
    }

    #[test]
    fn uniform_threshold_inputs_pass() {
        let result = compute(0.7, 0.7, 0.7);
        assert!((result.final_score - 0.70).abs() < EPS);
        assert!(result.passed);
    }

    #[test]
    fn just_below_threshold_fails() {
        let result = compute(0.6, 0.8, 0.7);
        assert!((result.final_score - 0.69).abs() < EPS);
        assert!(!result.passed);
    }

    #[test]
    fn threshold_boundary_has_no_drift() {
        for (liveness, expected) in [(0.85, true), (0.825, false), (0.875, true)] {
            let result = compute(liveness, 0.6, 0.6);
            let expected_final = 0.4 * liveness + 0.36;
            assert!((result.final_score - expected_final).abs() < EPS);
            assert_eq!(result.passed, expected, "liveness {}", liveness);
        }
    }

    #[test]
    fn formula_holds_across_grid() {
        let steps = [0.0, 0.1, 0.25, 0.5, 0.69, 0.7, 0.71, 0.9, 1.0];
        for &l in &steps {
            for &d in &steps {
                for &e in &steps {
                    let result = compute(l, d, e);
                    let expected = 0.4 * l + 0.3 * d + 0.3 * e;
                    assert!((result.final_score - expected).abs() < EPS);
                    assert_eq!(result.passed, result.final_score >= PASS_THRESHOLD);
                }
            }
        }
    }

    #[test]
    fn extremes() {
        assert!(compute(1.0, 1.0, 1.0).passed);
        assert!(!compute(0.0, 0.0, 0.0).passed);
        assert_eq!(compute(1.0, 1.0, 1.0).final_score, 1.0);
    }
}
