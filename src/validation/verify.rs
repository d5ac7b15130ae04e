use garde::Validate;
use serde::Deserialize;
use crate::error::{AppError, Result};

/// The request payload for starting a verification session.
#[derive(Deserialize, Debug, Validate)]
pub struct StartVerificationRequest {
    #[serde(default)]
    #[garde(length(min = 1, max = 255), custom(user_id_charset))]
    pub user_id: String,
}

fn user_id_charset(value: &str, _ctx: &()) -> garde::Result {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        Ok(())
    } else {
        Err(garde::Error::new(
            "may only contain letters, digits, '_', '-', '.' and '@'",
        ))
    }
}

/// Validates a start request.
///
/// # Returns
///
/// `MISSING_USER_ID` for an absent or blank id, `INVALID_USER_ID` for one that
/// breaks the length or charset rules.
pub fn validate_start_request(request: &StartVerificationRequest) -> Result<()> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::validation("MISSING_USER_ID", "user_id is required"));
    }

    request
        .validate()
        .map_err(|report| AppError::validation("INVALID_USER_ID", report.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: &str) -> StartVerificationRequest {
        StartVerificationRequest {
            user_id: user_id.to_string(),
        }
    }

    #[test]
    fn accepts_usual_ids() {
        for id in ["user1", "alice@example.com", "a-b_c.d", &"x".repeat(255)] {
            assert!(validate_start_request(&request(id)).is_ok(), "{}", id);
        }
    }

    #[test]
    fn blank_is_missing() {
        for id in ["", "   "] {
            let err = validate_start_request(&request(id)).unwrap_err();
            assert_eq!(err.code(), "MISSING_USER_ID");
        }
    }

    #[test]
    fn rejects_bad_ids() {
        for id in ["user 1", "robert'); drop table", "ünïcode", &"x".repeat(256)] {
            let err = validate_start_request(&request(id)).unwrap_err();
            assert_eq!(err.code(), "INVALID_USER_ID", "{}", id);
        }
    }
}
