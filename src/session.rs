//! Session tokens.
//!
//! Sessions are HS256 JWTs carrying the user id (`sub`), a unique id
//! (`jti`) and the usual `iat`/`exp` claims. Revocation is handled outside
//! the token: [`SessionCodec::token_id`] derives the blacklist identifier
//! from the raw token so the blacklist can be consulted before the signature
//! is checked.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Cookie that carries the session token.
pub const SESSION_COOKIE_NAME: &str = "session_token";

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    /// Session id
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

/// Why a session token was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token expired")]
    Expired,
    #[error("session token signature mismatch")]
    BadSignature,
    #[error("session token malformed: {0}")]
    Malformed(String),
}

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct SessionCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the secret is empty or the TTL is zero.
    pub fn new(secret: &[u8], ttl: Duration) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::ConfigError("session secret is empty".to_string()));
        }
        if ttl.is_zero() {
            return Err(AppError::ConfigError("session TTL is zero".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        validation.set_required_spec_claims(&["exp", "sub", "jti"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a session for `user_id`.
    pub fn issue(&self, user_id: &str) -> AppResult<IssuedSession> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs())
            .map_err(|_| AppError::ConfigError("session TTL out of range".to_string()))?;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat + ttl,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("session token encode failed: {e}")))?;

        Ok(IssuedSession { token, claims })
    }

    /// Verify signature, algorithm and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                ErrorKind::InvalidSignature => SessionError::BadSignature,
                other => SessionError::Malformed(format!("{other:?}")),
            })
    }

    /// Blacklist identifier for a raw token: base64url(SHA-256(token)).
    pub fn token_id(token: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn codec() -> SessionCodec {
        SessionCodec::new(b"session-secret-for-tests-0000000000", Duration::from_secs(3600))
            .unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec();
        let issued = codec.issue("user-42").unwrap();

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_each_session_has_unique_id() {
        let codec = codec();
        let a = codec.issue("u").unwrap();
        let b = codec.issue("u").unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(SessionCodec::token_id(&a.token), SessionCodec::token_id(&b.token));
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let token = codec().issue("u").unwrap().token;
        let other =
            SessionCodec::new(b"a-completely-different-secret-xyz", Duration::from_secs(60))
                .unwrap();
        assert_eq!(other.verify(&token), Err(SessionError::BadSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "u".to_string(),
            jti: "j".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"session-secret-for-tests-0000000000"),
        )
        .unwrap();

        assert_eq!(codec.verify(&token), Err(SessionError::Expired));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            codec().verify("not-a-jwt"),
            Err(SessionError::Malformed(_))
        ));
    }

    #[test]
    fn test_token_id_is_stable() {
        assert_eq!(SessionCodec::token_id("abc"), SessionCodec::token_id("abc"));
        assert_eq!(SessionCodec::token_id("abc").len(), 43);
    }
}
