use std::time::Duration;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{
    crypto::nonce::generate_nonce,
    models::challenge::{Challenge, ChallengeId, ChallengeKind, ChallengeSequence},
};

/// Draws randomized challenge sequences from the fixed action catalog.
#[derive(Debug, Clone)]
pub struct ChallengeGenerator {
    challenge_timeout: Duration,
}

impl ChallengeGenerator {
    pub fn new(challenge_timeout: Duration) -> Self {
        Self { challenge_timeout }
    }

    /// Generates `count` challenges for a session, numbered from zero.
    pub fn generate_sequence(&self, session_id: Uuid, count: usize) -> ChallengeSequence {
        self.generate_sequence_from(session_id, count, 0)
    }

    /// Generates `count` challenges numbered from `first_ordinal`.
    ///
    /// Follow-up sequences continue the numbering so challenge ids stay unique
    /// within the session.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session the sequence is bound to.
    /// * `count` - How many challenges to draw.
    /// * `first_ordinal` - The ordinal of the first challenge.
    ///
    /// # Returns
    ///
    /// A `ChallengeSequence` carrying a fresh nonce.
    pub fn generate_sequence_from(
        &self,
        session_id: Uuid,
        count: usize,
        first_ordinal: u32,
    ) -> ChallengeSequence {
        let mut rng = OsRng;
        let timeout_seconds = self.challenge_timeout.as_secs();

        let challenges = (0..count as u32)
            .filter_map(|offset| {
                let kind = *ChallengeKind::ALL.choose(&mut rng)?;
                let action = kind.actions().choose(&mut rng)?;
                let id = ChallengeId {
                    session_id,
                    kind,
                    ordinal: first_ordinal + offset,
                    action: action.name,
                };

                Some(Challenge {
                    challenge_id: id.to_string(),
                    kind,
                    instruction: action.instruction.to_string(),
                    timeout_seconds,
                })
            })
            .collect();

        ChallengeSequence {
            session_id,
            nonce: generate_nonce(),
            generated_at: Utc::now(),
            challenges,
        }
    }
}
