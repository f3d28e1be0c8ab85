use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Seconds of clock skew tolerated on `exp`.
const EXPIRY_LEEWAY_SECS: u64 = 30;

/// Claims of a Vybe session token. Tokens are issued by the account
/// service; this server only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("session token expired")]
    Expired,
    #[error("invalid session token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = EXPIRY_LEEWAY_SECS;
    validation
}

/// Mint a session token. Only tests and local tooling need this.
pub fn create_session_token(
    user_id: &str,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let issued = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: issued.timestamp(),
        exp: (issued + Duration::hours(expiry_hours)).timestamp(),
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key)
}

/// Check a token's signature and expiry and return its claims.
pub fn validate_session_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &validation())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_names_its_user() {
        let token = create_session_token("u1", "vybe-test", 1).unwrap();
        let claims = validate_session_token(&token, "vybe-test").unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = create_session_token("u1", "secret-a", 1).unwrap();
        assert!(matches!(
            validate_session_token(&token, "secret-b"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token_is_reported_as_expired() {
        let token = create_session_token("u1", "vybe-test", -2).unwrap();
        assert!(matches!(
            validate_session_token(&token, "vybe-test"),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_malformed_tokens_are_invalid() {
        for raw in ["", "abc", "a.b.c"] {
            assert!(matches!(
                validate_session_token(raw, "vybe-test"),
                Err(TokenError::Invalid(_))
            ));
        }
    }
}
