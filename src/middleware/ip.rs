//! Client identity resolution.
//!
//! The rate limiter keys windows by client IP, taken from proxy headers in a
//! configurable priority order (`CLIENT_IP_HEADERS`, default
//! `x-forwarded-for, x-real-ip, cf-connecting-ip, x-client-ip`).
//!
//! # Rules
//!
//! - Headers are checked in order; the first usable one wins.
//! - For list-valued headers (`X-Forwarded-For: client, proxy1, proxy2`)
//!   only the first entry is considered.
//! - A value is usable only if it parses as an IPv4 or IPv6 address.
//!   Anything else (ports, hostnames, garbage) is skipped.
//! - With no usable header the client resolves to [`LOOPBACK_PLACEHOLDER`].
//!
//! # Security Warning: IP Spoofing Risk
//!
//! **These headers are client-controlled.** Run behind a reverse proxy that
//! overwrites them, and block direct access to this service:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! Otherwise attackers can rotate spoofed addresses to dodge per-IP limits,
//! or exhaust the quota of someone else's address.
//!
//! All requests without a usable header share the placeholder key, so they
//! are collectively rate limited. Watch for high placeholder traffic in
//! production logs; it usually means a misconfigured proxy.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use tracing::{debug, warn};

/// Identity used when no header yields a valid address.
pub const LOOPBACK_PLACEHOLDER: &str = "127.0.0.1";

/// Default header priority.
pub const DEFAULT_CLIENT_IP_HEADERS: [&str; 4] =
    ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "x-client-ip"];

/// Resolves the client identity from request headers.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    headers: Arc<Vec<HeaderName>>,
}

impl ClientIpResolver {
    /// Build a resolver from header names in priority order.
    ///
    /// Names that are not valid HTTP header names are dropped with a warning.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref().trim().to_ascii_lowercase();
                match HeaderName::try_from(name.as_str()) {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(header = %name, "Ignoring invalid client IP header name");
                        None
                    }
                }
            })
            .collect();

        Self {
            headers: Arc::new(headers),
        }
    }

    pub fn header_names(&self) -> &[HeaderName] {
        &self.headers
    }

    /// Resolve the client identity.
    ///
    /// Returns a borrowed placeholder when nothing usable is found, so the
    /// fallback path does not allocate.
    pub fn resolve(&self, headers: &HeaderMap) -> Cow<'static, str> {
        for name in self.headers.iter() {
            if let Some(ip) = first_valid_ip(headers, name) {
                debug!(client_ip = %ip, header = %name, "Resolved client IP");
                return Cow::Owned(ip.to_string());
            }
        }

        debug!("No usable client IP header, using placeholder");
        Cow::Borrowed(LOOPBACK_PLACEHOLDER)
    }
}

impl Default for ClientIpResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_IP_HEADERS)
    }
}

/// First entry of `name`, if it parses as an IP address.
#[inline]
fn first_valid_ip(headers: &HeaderMap, name: &HeaderName) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    first.parse::<IpAddr>().ok()
}
