use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign participant token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid participant token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("participant token was issued for another session")]
    WrongSession,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParticipantClaims {
    /// Participant id
    sub: String,
    /// Session id
    sid: String,
    exp: i64,
}

/// Issues and verifies HS256 tokens binding a participant id to one session
pub struct ParticipantTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl ParticipantTokens {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Token valid until the session itself expires
    pub fn issue(
        &self,
        session_id: &str,
        participant_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = ParticipantClaims {
            sub: participant_id.to_string(),
            sid: session_id.to_string(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Sign)
    }

    /// Returns the participant id carried by a token issued for `session_id`
    pub fn verify(&self, token: &str, session_id: &str) -> Result<String, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<ParticipantClaims>(token, &self.decoding, &validation)
            .map_err(TokenError::Invalid)?;
        if data.claims.sid != session_id {
            return Err(TokenError::WrongSession);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(20)
    }

    #[test]
    fn issued_tokens_verify() {
        let tokens = ParticipantTokens::new("secret");
        let token = tokens.issue("s1", "alice", later()).unwrap();
        assert_eq!(tokens.verify(&token, "s1").unwrap(), "alice");
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let tokens = ParticipantTokens::new("secret");
        let token = tokens.issue("s1", "alice", later()).unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(tokens.verify(&tampered, "s1"), Err(TokenError::Invalid(_))));

        let forged = ParticipantTokens::new("other").issue("s1", "mallory", later()).unwrap();
        assert!(matches!(tokens.verify(&forged, "s1"), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn tokens_are_bound_to_their_session() {
        let tokens = ParticipantTokens::new("secret");
        let token = tokens.issue("s1", "alice", later()).unwrap();
        assert!(matches!(tokens.verify(&token, "s2"), Err(TokenError::WrongSession)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = ParticipantTokens::new("secret");
        let token = tokens
            .issue("s1", "alice", Utc::now() - chrono::Duration::minutes(5))
            .unwrap();
        assert!(matches!(tokens.verify(&token, "s1"), Err(TokenError::Invalid(_))));
    }
}
