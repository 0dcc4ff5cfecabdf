//! Fuzz testing for untrusted request input.
//!
//! Covers account form validation, client IP header parsing and cookie
//! lookup. All of these see raw attacker-controlled bytes.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_request_input
//! ```

#![no_main]

use axum::http::{HeaderMap, HeaderValue, header};
use libfuzzer_sys::fuzz_target;
use skygate::cookie::read_cookie;
use skygate::middleware::ClientIpResolver;
use skygate::validation::{normalize_email, validate_display_name, validate_email, validate_password};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = validate_email(s);
        let _ = validate_password(s);
        let _ = validate_display_name(s);
        let _ = normalize_email(s);
    }

    let Ok(value) = HeaderValue::from_bytes(data) else {
        return;
    };
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", value.clone());
    headers.insert(header::COOKIE, value);

    let ip = ClientIpResolver::default().resolve(&headers);
    assert!(!ip.is_empty());
    let _ = read_cookie(&headers, "csrf_token");
});
