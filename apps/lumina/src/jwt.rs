//! Signed session tokens for the dashboard (HS256, 24-hour expiry).

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

const TOKEN_EXPIRY_SECS: i64 = 24 * 60 * 60;
const ISSUER: &str = "lumina";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            user_id,
            email: email.to_string(),
            iat: now,
            exp: now + TOKEN_EXPIRY_SECS,
            iss: ISSUER.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_validate_round_trips() {
        let manager = JwtManager::new("test-secret");
        let user_id = Uuid::new_v4();
        let token = manager.issue(user_id, "user@example.com").unwrap();

        let claims = manager.validate(&token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.exp - claims.iat, TOKEN_EXPIRY_SECS);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = JwtManager::new("secret-a")
            .issue(Uuid::new_v4(), "user@example.com")
            .unwrap();
        assert!(JwtManager::new("secret-b").validate(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let token = manager.issue(Uuid::new_v4(), "user@example.com").unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        assert!(manager.validate(&tampered).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            iat: now - 2 * TOKEN_EXPIRY_SECS,
            exp: now - TOKEN_EXPIRY_SECS,
            iss: ISSUER.to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(manager.validate(&token).is_err());
    }
}
