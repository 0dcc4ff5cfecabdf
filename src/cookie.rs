//! Minimal cookie helpers.
//!
//! Only what the token cookies need: look up a single cookie in the request
//! `Cookie` header and render `Set-Cookie` values with the attributes the
//! cookie contract requires (`HttpOnly`, `SameSite=Lax`, `Path=/`, optional
//! `Secure`, `Max-Age` tied to the token lifetime).

use std::fmt;
use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use tracing::warn;

/// Find the value of cookie `name` in the request headers.
///
/// Handles multiple `Cookie` headers and `; `-separated pairs. Returns the
/// first non-empty match.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(key, value)| (key, value.trim_matches('"')))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

/// A `Set-Cookie` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    max_age: Option<Duration>,
    secure: bool,
}

impl SetCookie {
    /// New cookie scoped to `/`, `HttpOnly`, `SameSite=Lax`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            secure: false,
        }
    }

    /// Cookie that instructs the browser to drop `name` immediately.
    pub fn expired(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(Duration::ZERO)
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Append this cookie to a response header map.
    pub fn apply(&self, headers: &mut HeaderMap) {
        match HeaderValue::from_str(&self.to_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = %self.name, error = %e, "Cookie value is not a valid header"),
        }
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path=/; HttpOnly; SameSite=Lax", self.name, self.value)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}
