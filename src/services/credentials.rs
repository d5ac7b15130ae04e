use std::path::Path;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    crypto::keys::{self, SigningKeyPair},
    error::{AppError, Result},
    models::credential::{Claims, IssuedToken, TokenError, TokenValidation},
};

/// Lifetime of an issued credential in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 900;

/// Issuer claim stamped into, and required from, every credential.
pub const TOKEN_ISSUER: &str = "proof-of-life-auth";

/// Signs and validates liveness credentials (RS256).
///
/// The key pair is loaded once at startup and owned by this value; it is
/// shared through application state rather than any global.
pub struct CredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl CredentialIssuer {
    /// Builds an issuer from PEM encoded keys.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| AppError::Signing(format!("Invalid private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| AppError::Signing(format!("Invalid public key: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
        })
    }

    pub fn from_key_pair(pair: &SigningKeyPair) -> Result<Self> {
        Self::from_pem(&pair.private_pem, &pair.public_pem)
    }

    /// Loads the key pair from disk or generates it on first start.
    pub async fn load_or_generate(private_path: &Path, public_path: &Path) -> Result<Self> {
        let pair = keys::load_or_generate(private_path, public_path).await?;
        Self::from_key_pair(&pair)
    }

    /// Builds an issuer around a freshly generated, unpersisted key pair.
    pub fn generate() -> Result<Self> {
        Self::from_key_pair(&keys::generate_key_pair()?)
    }

    /// Signs a credential for a verified session.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The subject.
    /// * `session_id` - The session that produced the decision.
    /// * `final_score` - The aggregated score.
    ///
    /// # Returns
    ///
    /// The signed token, its fingerprint and its timing.
    pub fn issue(&self, user_id: &str, session_id: Uuid, final_score: f64) -> Result<IssuedToken> {
        self.issue_at(user_id, session_id, final_score, Utc::now())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: &str,
        session_id: Uuid,
        final_score: f64,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let issued_at = now.timestamp();
        let expires_at = issued_at + TOKEN_LIFETIME_SECS;

        let claims = Claims {
            sub: user_id.to_string(),
            session_id: session_id.to_string(),
            final_score,
            iat: issued_at,
            exp: expires_at,
            iss: TOKEN_ISSUER.to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Signing(format!("Failed to sign token: {}", e)))?;

        Ok(IssuedToken {
            token_id: fingerprint(&token),
            token,
            issued_at,
            expires_at,
        })
    }

    /// Validates a token. Never fails: rejections come back as values.
    pub fn validate(&self, token: &str) -> TokenValidation {
        let claims = match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let error = match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    _ => TokenError::Malformed,
                };
                tracing::debug!("Token rejected: {:?}", e.kind());
                return TokenValidation::rejected(error);
            }
        };

        // exp must lie strictly in the future
        if claims.exp <= Utc::now().timestamp() {
            return TokenValidation::rejected(TokenError::Expired);
        }

        TokenValidation::accepted(claims)
    }
}

/// Stable id of a token: hex SHA-256 of its compact form.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use once_cell::sync::Lazy;

    static ISSUER: Lazy<CredentialIssuer> =
        Lazy::new(|| CredentialIssuer::generate().expect("key generation"));
    static FOREIGN: Lazy<CredentialIssuer> =
        Lazy::new(|| CredentialIssuer::generate().expect("key generation"));

    #[test]
    fn round_trip() {
        let session_id = Uuid::new_v4();
        let issued = ISSUER.issue("user1", session_id, 0.82).unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, 900);

        let validation = ISSUER.validate(&issued.token);
        assert!(validation.valid);
        assert_eq!(validation.user_id.as_deref(), Some("user1"));
        assert_eq!(validation.session_id, Some(session_id.to_string()));
        assert_eq!(validation.issued_at, Some(issued.issued_at));
        assert_eq!(validation.expires_at, Some(issued.expires_at));
        assert_eq!(
            validation.expires_at.unwrap() - validation.issued_at.unwrap(),
            900
        );
        assert!(validation.error.is_none());
    }

    #[test]
    fn token_id_is_sha256_fingerprint() {
        let issued = ISSUER.issue("user1", Uuid::new_v4(), 0.9).unwrap();
        assert_eq!(issued.token_id.len(), 64);
        assert_eq!(issued.token_id, fingerprint(&issued.token));
    }

    #[test]
    fn tampering_anywhere_is_rejected() {
        let issued = ISSUER.issue("user1", Uuid::new_v4(), 0.9).unwrap();
        let bytes = issued.token.as_bytes();

        for i in 0..bytes.len() {
            if bytes[i] == b'.' {
                continue;
            }
            let mut tampered = bytes.to_vec();
            tampered[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(tampered).unwrap();

            let validation = ISSUER.validate(&tampered);
            assert!(!validation.valid, "tampered position {} accepted", i);
            assert!(matches!(
                validation.error,
                Some(TokenError::BadSignature) | Some(TokenError::Malformed)
            ));
            assert!(validation.user_id.is_none());
        }
    }

    #[test]
    fn expired_token() {
        let issued = ISSUER
            .issue_at("user1", Uuid::new_v4(), 0.9, Utc::now() - Duration::seconds(901))
            .unwrap();

        let validation = ISSUER.validate(&issued.token);
        assert!(!validation.valid);
        assert_eq!(validation.error, Some(TokenError::Expired));
    }

    #[test]
    fn token_expiring_now_is_expired() {
        let issued = ISSUER
            .issue_at("user1", Uuid::new_v4(), 0.9, Utc::now() - Duration::seconds(900))
            .unwrap();
        assert_eq!(ISSUER.validate(&issued.token).error, Some(TokenError::Expired));
    }

    #[test]
    fn foreign_key_is_bad_signature() {
        let issued = FOREIGN.issue("user1", Uuid::new_v4(), 0.9).unwrap();
        let validation = ISSUER.validate(&issued.token);
        assert!(!validation.valid);
        assert_eq!(validation.error, Some(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        for token in ["", "not-a-token", "a.b.c", "eyJhbGciOiJSUzI1NiJ9.e30"] {
            let validation = ISSUER.validate(token);
            assert!(!validation.valid);
            assert_eq!(validation.error, Some(TokenError::Malformed), "token {:?}", token);
        }
    }

    #[test]
    fn wrong_issuer_is_malformed() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user1".into(),
            session_id: Uuid::new_v4().to_string(),
            final_score: 0.9,
            iat: now,
            exp: now + 900,
            iss: "someone-else".into(),
        };
        let token =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &ISSUER.encoding_key)
                .unwrap();

        assert_eq!(ISSUER.validate(&token).error, Some(TokenError::Malformed));
    }
}
