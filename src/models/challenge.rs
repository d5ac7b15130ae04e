use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The two families of challenge a subject can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Gesture,
    Expression,
}

impl ChallengeKind {
    pub const ALL: [ChallengeKind; 2] = [ChallengeKind::Gesture, ChallengeKind::Expression];

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Gesture => "gesture",
            ChallengeKind::Expression => "expression",
        }
    }

    /// The catalog of actions for this kind.
    pub fn actions(self) -> &'static [Action] {
        match self {
            ChallengeKind::Gesture => GESTURES,
            ChallengeKind::Expression => EXPRESSIONS,
        }
    }
}

impl FromStr for ChallengeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gesture" => Ok(ChallengeKind::Gesture),
            "expression" => Ok(ChallengeKind::Expression),
            _ => Err(()),
        }
    }
}

/// A catalog entry: the machine name of an action and what the subject is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    pub name: &'static str,
    pub instruction: &'static str,
}

const fn action(name: &'static str, instruction: &'static str) -> Action {
    Action { name, instruction }
}

/// Head and face gestures.
pub const GESTURES: &[Action] = &[
    action("nod_up", "Nod your head up"),
    action("nod_down", "Nod your head down"),
    action("turn_left", "Turn your head to the left"),
    action("turn_right", "Turn your head to the right"),
    action("tilt_left", "Tilt your head to the left"),
    action("tilt_right", "Tilt your head to the right"),
    action("open_mouth", "Open your mouth wide"),
    action("close_eyes", "Close your eyes"),
    action("raise_eyebrows", "Raise your eyebrows"),
    action("blink", "Blink your eyes"),
];

/// Facial expressions.
pub const EXPRESSIONS: &[Action] = &[
    action("smile", "Smile"),
    action("frown", "Frown"),
    action("surprised", "Look surprised"),
    action("neutral", "Keep a neutral expression"),
    action("angry", "Look angry"),
];

/// Identifier of a challenge, rendered as `{session_id}_{kind}_{ordinal}_{action}`.
///
/// The rendering is reversible, so the session, ordinal, kind and action of a
/// challenge can be recovered from the id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeId {
    pub session_id: Uuid,
    pub kind: ChallengeKind,
    pub ordinal: u32,
    pub action: &'static str,
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.session_id,
            self.kind.as_str(),
            self.ordinal,
            self.action
        )
    }
}

impl FromStr for ChallengeId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Action names contain underscores, so only split off the first three fields.
        let mut parts = s.splitn(4, '_');
        let session_id = parts.next().and_then(|p| Uuid::parse_str(p).ok()).ok_or(())?;
        let kind: ChallengeKind = parts.next().ok_or(())?.parse()?;
        let ordinal = parts.next().and_then(|p| p.parse().ok()).ok_or(())?;
        let name = parts.next().ok_or(())?;
        let action = kind
            .actions()
            .iter()
            .find(|a| a.name == name)
            .ok_or(())?
            .name;

        Ok(Self {
            session_id,
            kind,
            ordinal,
            action,
        })
    }
}

/// A single action the subject must perform before `timeout_seconds` elapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: String,
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    pub instruction: String,
    pub timeout_seconds: u64,
}

impl Challenge {
    /// Parses the structured id back out of `challenge_id`.
    pub fn parsed_id(&self) -> Option<ChallengeId> {
        self.challenge_id.parse().ok()
    }
}

/// An ordered batch of challenges bound to one session and one nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeSequence {
    pub session_id: Uuid,
    pub nonce: String,
    pub generated_at: DateTime<Utc>,
    pub challenges: Vec<Challenge>,
}

/// The analyzer's verdict on one challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub challenge_id: String,
    pub completed: bool,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

impl ChallengeResult {
    /// A failed result with zero confidence, used when a challenge times out.
    pub fn timed_out(challenge_id: String, now: DateTime<Utc>) -> Self {
        Self {
            challenge_id,
            completed: false,
            confidence: 0.0,
            observed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_sizes() {
        assert!(GESTURES.len() >= 10);
        assert!(EXPRESSIONS.len() >= 5);
    }

    #[test]
    fn challenge_id_parses_back() {
        let id = ChallengeId {
            session_id: Uuid::new_v4(),
            kind: ChallengeKind::Gesture,
            ordinal: 2,
            action: "raise_eyebrows",
        };

        let parsed: ChallengeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn challenge_id_rejects_unknown_action() {
        let raw = format!("{}_expression_0_nod_up", Uuid::new_v4());
        assert!(raw.parse::<ChallengeId>().is_err());
        assert!("garbage".parse::<ChallengeId>().is_err());
    }
}
