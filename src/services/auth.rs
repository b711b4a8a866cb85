use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const SESSION_AUDIENCE: &str = "session";
const MEDIA_AUDIENCE: &str = "media";

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    #[serde(default)]
    pub staff: bool,
}

impl SessionClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// Claims of a signed media URL: grants read access to one storage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaClaims {
    key: String,
    exp: i64,
    aud: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// Issues and verifies HS256 tokens for sessions and media access.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], session_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl,
        }
    }

    pub fn issue_session(&self, user_id: Uuid, staff: bool) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
            aud: SESSION_AUDIENCE.to_string(),
            staff,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, expiry and audience of a bearer token.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let validation = validation_for(SESSION_AUDIENCE);
        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    pub fn sign_media(&self, key: &str, ttl: Duration) -> Result<String, AuthError> {
        let claims = MediaClaims {
            key: key.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
            aud: MEDIA_AUDIENCE.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Check that a media token is valid and was issued for `key`.
    pub fn verify_media(&self, token: &str, key: &str) -> Result<(), AuthError> {
        let validation = validation_for(MEDIA_AUDIENCE);
        let claims = decode::<MediaClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)?;
        if claims.key != key {
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }
}

fn validation_for(audience: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.leeway = 5;
    validation
}

/// Builds absolute, signed URLs for stored images.
pub struct MediaUrls {
    tokens: Arc<TokenService>,
    base_url: String,
    ttl: Duration,
}

impl MediaUrls {
    pub fn new(tokens: Arc<TokenService>, base_url: &str, ttl: Duration) -> Self {
        Self {
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl,
        }
    }

    pub fn url_for(&self, key: &str) -> Result<String, AuthError> {
        let token = self.tokens.sign_media(key, self.ttl)?;
        Ok(format!("{}/media/{}?token={}", self.base_url, key, token))
    }

    pub fn verify(&self, token: &str, key: &str) -> Result<(), AuthError> {
        self.tokens.verify_media(token, key)
    }
}

/// Hash a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(password_hash).map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2 is CPU-bound; run it off the async executor.
pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

pub async fn verify_password_blocking(password: String, password_hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"test-secret-with-enough-bytes", Duration::hours(1))
    }

    #[test]
    fn test_session_token_round_trip() {
        let tokens = service();
        let user_id = Uuid::new_v4();
        let issued = tokens.issue_session(user_id, true).unwrap();
        let claims = tokens.verify_session(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.jti, issued.claims.jti);
        assert!(claims.staff);
    }

    #[test]
    fn test_expired_session_rejected() {
        let tokens = TokenService::new(b"test-secret-with-enough-bytes", Duration::minutes(-10));
        let issued = tokens.issue_session(Uuid::new_v4(), false).unwrap();
        assert!(matches!(
            tokens.verify_session(&issued.token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let issued = service().issue_session(Uuid::new_v4(), false).unwrap();
        let other = TokenService::new(b"another-secret-entirely", Duration::hours(1));
        assert!(other.verify_session(&issued.token).is_err());
    }

    #[test]
    fn test_media_token_bound_to_key() {
        let tokens = service();
        let token = tokens
            .sign_media("simulations/a_rear.jpg", Duration::minutes(5))
            .unwrap();
        assert!(tokens.verify_media(&token, "simulations/a_rear.jpg").is_ok());
        assert!(tokens.verify_media(&token, "simulations/b_rear.jpg").is_err());
    }

    #[test]
    fn test_tokens_not_interchangeable() {
        let tokens = service();
        let session = tokens.issue_session(Uuid::new_v4(), false).unwrap();
        assert!(tokens.verify_media(&session.token, "originals/x.png").is_err());

        let media = tokens.sign_media("originals/x.png", Duration::minutes(5)).unwrap();
        assert!(tokens.verify_session(&media).is_err());
    }

    #[test]
    fn test_media_url_shape() {
        let urls = MediaUrls::new(Arc::new(service()), "https://app.example.com/", Duration::minutes(5));
        let url = urls.url_for("originals/x.png").unwrap();
        assert!(url.starts_with("https://app.example.com/media/originals/x.png?token="));
    }

    #[test]
    fn test_password_hash_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[tokio::test]
    async fn test_blocking_password_helpers() {
        let hash = hash_password_blocking("correct horse".to_string()).await.unwrap();
        assert!(verify_password_blocking("correct horse".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password_blocking("wrong horse".to_string(), hash).await.unwrap());
        assert!(matches!(
            verify_password_blocking("x".to_string(), "not-a-hash".to_string()).await,
            Err(AuthError::Hashing(_))
        ));
    }
}
