//! Anti-forgery token codec.
//!
//! # Token Format
//!
//! ```text
//! <random_part>.<timestamp_ms>.<signature>
//! ```
//!
//! - `random_part`: 32 CSPRNG bytes, base64url without padding
//! - `timestamp_ms`: issue instant in Unix milliseconds
//! - `signature`: HMAC-SHA256 over `random_part.timestamp_ms`, base64url
//!
//! The timestamp is part of the signed material, so a captured token cannot
//! be replayed past its TTL by editing the expiry.
//!
//! # Cookie Flow
//!
//! [`CsrfCodec::get_or_issue`] reuses a valid `csrf_token` cookie and only
//! mints a new token (plus `Set-Cookie`) when the cookie is absent or invalid.
//! Form submissions are checked with [`CsrfCodec::verify_submission`], which
//! requires the submitted token to be valid and to match the cookie.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::cookie::{self, SetCookie};
use crate::error::{AppError, AppResult};
use crate::metrics;

type HmacSha256 = Hmac<Sha256>;

/// Cookie that carries the CSRF token.
pub const CSRF_COOKIE_NAME: &str = "csrf_token";

/// Form field that carries the submitted CSRF token.
pub const CSRF_FORM_FIELD: &str = "csrfToken";

/// Number of random bytes in the payload.
const RANDOM_BYTES: usize = 32;

/// Tolerated forward clock drift between server instances.
const MAX_CLOCK_SKEW_MS: i64 = 30_000;

/// A decoded CSRF token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub random_part: String,
    pub issued_at_ms: i64,
    pub signature: String,
}

impl fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.random_part, self.issued_at_ms, self.signature)
    }
}

impl CsrfToken {
    /// Split a serialized token into its parts.
    ///
    /// Returns `None` unless there are exactly three non-empty parts and a
    /// numeric timestamp.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let random_part = parts.next().filter(|p| !p.is_empty())?;
        let timestamp = parts.next().filter(|p| !p.is_empty())?;
        let signature = parts.next().filter(|p| !p.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let issued_at_ms = timestamp.parse().ok()?;

        Some(Self {
            random_part: random_part.to_string(),
            issued_at_ms,
            signature: signature.to_string(),
        })
    }
}

/// Result of [`CsrfCodec::get_or_issue`].
#[derive(Debug, Clone)]
pub struct CsrfIssue {
    pub token: String,
    /// Present only when a new token was minted.
    pub set_cookie: Option<SetCookie>,
}

/// Issues and validates CSRF tokens under a process-wide secret.
///
/// Cheap to clone; the keyed MAC is prepared once and cloned per operation.
#[derive(Clone)]
pub struct CsrfCodec {
    mac: Arc<HmacSha256>,
    ttl: Duration,
    secure_cookie: bool,
}

impl fmt::Debug for CsrfCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfCodec")
            .field("ttl", &self.ttl)
            .field("secure_cookie", &self.secure_cookie)
            .finish_non_exhaustive()
    }
}

impl CsrfCodec {
    /// Create a codec from a signing secret.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the secret is empty or the TTL is zero.
    pub fn new(secret: &[u8], ttl: Duration, secure_cookie: bool) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::ConfigError("CSRF secret is empty".to_string()));
        }
        if ttl.is_zero() {
            return Err(AppError::ConfigError("CSRF token TTL is zero".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AppError::ConfigError(format!("Invalid CSRF secret: {e}")))?;

        Ok(Self {
            mac: Arc::new(mac),
            ttl,
            secure_cookie,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a fresh token stamped with the current time.
    pub fn issue(&self) -> CsrfToken {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> CsrfToken {
        let bytes: [u8; RANDOM_BYTES] = rand::random();
        let random_part = URL_SAFE_NO_PAD.encode(bytes);
        let issued_at_ms = now.timestamp_millis();
        let signature = self.sign(&random_part, issued_at_ms);

        CsrfToken {
            random_part,
            issued_at_ms,
            signature,
        }
    }

    /// Check signature and freshness. Never panics; malformed input is `false`.
    pub fn validate(&self, raw: &str) -> bool {
        self.validate_at(raw, Utc::now())
    }

    pub fn validate_at(&self, raw: &str, now: DateTime<Utc>) -> bool {
        let Some(token) = CsrfToken::parse(raw) else {
            debug!("CSRF token malformed");
            return false;
        };

        let age_ms = now.timestamp_millis().saturating_sub(token.issued_at_ms);
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if age_ms > ttl_ms {
            debug!(age_ms, ttl_ms, "CSRF token expired");
            return false;
        }
        if age_ms < -MAX_CLOCK_SKEW_MS {
            debug!(age_ms, "CSRF token issued in the future");
            return false;
        }

        let expected = self.sign(&token.random_part, token.issued_at_ms);
        expected.as_bytes().ct_eq(token.signature.as_bytes()).into()
    }

    /// Return the random component of a well-formed token.
    ///
    /// Usable as a correlation key only; it says nothing about validity.
    pub fn extract_payload(raw: &str) -> Option<&str> {
        let (payload, rest) = raw.split_once('.')?;
        (!payload.is_empty() && !rest.is_empty()).then_some(payload)
    }

    /// Reuse the cookie token when valid, otherwise mint a new one.
    pub fn get_or_issue(&self, headers: &HeaderMap) -> CsrfIssue {
        if let Some(existing) = cookie::read_cookie(headers, CSRF_COOKIE_NAME)
            && self.validate(existing)
        {
            return CsrfIssue {
                token: existing.to_string(),
                set_cookie: None,
            };
        }

        let token = self.issue().to_string();
        let set_cookie = SetCookie::new(CSRF_COOKIE_NAME, token.clone())
            .max_age(self.ttl)
            .secure(self.secure_cookie);

        CsrfIssue {
            token,
            set_cookie: Some(set_cookie),
        }
    }

    /// Double-submit check: the submitted token must be valid and identical
    /// to the one held in the cookie.
    pub fn verify_submission(&self, submitted: Option<&str>, cookie_token: Option<&str>) -> bool {
        let outcome = match (submitted, cookie_token) {
            (Some(submitted), Some(cookie_token)) => {
                let same: bool = submitted.as_bytes().ct_eq(cookie_token.as_bytes()).into();
                same && self.validate(submitted)
            }
            _ => false,
        };
        metrics::record_csrf_validation(outcome);
        outcome
    }

    fn sign(&self, random_part: &str, issued_at_ms: i64) -> String {
        let mut mac = HmacSha256::clone(&self.mac);
        mac.update(random_part.as_bytes());
        mac.update(b".");
        mac.update(issued_at_ms.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
