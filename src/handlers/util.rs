//! Shared utilities for handlers.

use axum::http::HeaderMap;

use crate::cookie::read_cookie;
use crate::csrf::CSRF_COOKIE_NAME;
use crate::gate::GateRequest;
use crate::state::AppState;

/// Describe a request to the gate: client identity plus both halves of the
/// double-submit CSRF pair.
pub(crate) fn gate_request(
    state: &AppState,
    headers: &HeaderMap,
    submitted_csrf: Option<String>,
) -> GateRequest {
    let client_ip = state.client_ip.resolve(headers).into_owned();
    let cookie_csrf = read_cookie(headers, CSRF_COOKIE_NAME).map(str::to_string);

    GateRequest::new(client_ip).with_csrf(submitted_csrf, cookie_csrf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::{HeaderValue, header};

    #[tokio::test]
    async fn test_gate_request_collects_identity_and_tokens() {
        let state = AppState::connect(Config::default()).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        headers.insert(header::COOKIE, HeaderValue::from_static("csrf_token=abc.1.sig; other=x"));

        let req = gate_request(&state, &headers, Some("abc.1.sig".to_string()));
        assert_eq!(req.client_ip, "1.2.3.4");
        assert_eq!(req.cookie_csrf.as_deref(), Some("abc.1.sig"));
        assert_eq!(req.submitted_csrf.as_deref(), Some("abc.1.sig"));

        let bare = gate_request(&state, &HeaderMap::new(), Some(String::new()));
        assert_eq!(bare.client_ip, "127.0.0.1");
        assert!(bare.cookie_csrf.is_none());
        assert!(bare.submitted_csrf.is_none());

        state.shutdown().await;
    }
}
