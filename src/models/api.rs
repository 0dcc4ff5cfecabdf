//! HTTP request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitStatus;

/// Sign-in form.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "csrfToken")]
    pub csrf_token: Option<String>,
}

/// Sign-up form.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUpForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "csrfToken")]
    pub csrf_token: Option<String>,
}

/// Sign-out form. Only carries the CSRF token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignOutForm {
    #[serde(rename = "csrfToken")]
    pub csrf_token: Option<String>,
}

/// `GET /api/csrf` response.
#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub token: String,
}

/// Per-policy view returned by `GET /api/rate-limit-status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOverview {
    pub sign_in: RateLimitStatus,
    pub sign_up: RateLimitStatus,
    pub general_auth: RateLimitStatus,
    pub csrf: RateLimitStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub rate_limits: RateLimitOverview,
}

/// `GET /api/session` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Whether the backing store answered a ping
    pub store_connected: bool,
    /// Service version
    pub version: String,
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_form_field_names() {
        let form: SignInForm = serde_json::from_str(
            r#"{"email":"a@b.co","password":"secret123","csrfToken":"abc.1.sig"}"#,
        )
        .unwrap();
        assert_eq!(form.email, "a@b.co");
        assert_eq!(form.csrf_token.as_deref(), Some("abc.1.sig"));
    }

    #[test]
    fn test_missing_csrf_field_is_none() {
        let form: SignOutForm = serde_json::from_str("{}").unwrap();
        assert!(form.csrf_token.is_none());
    }

    #[test]
    fn test_rate_limit_response_shape() {
        let status = RateLimitStatus {
            remaining: 5,
            reset_time: Utc::now(),
            limit: 5,
            window_ms: 900_000,
        };
        let response = RateLimitStatusResponse {
            rate_limits: RateLimitOverview {
                sign_in: status.clone(),
                sign_up: status.clone(),
                general_auth: status.clone(),
                csrf: status,
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        let sign_in = &json["rateLimits"]["signIn"];
        assert_eq!(sign_in["remaining"], 5);
        assert_eq!(sign_in["windowMs"], 900_000);
        assert!(sign_in["resetTime"].is_string());
        assert!(json["rateLimits"]["generalAuth"].is_object());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            store_connected: true,
            version: "0.1.0".to_string(),
            uptime_seconds: 1,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&response).expect("Serialization should succeed");
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"store_connected\":true"));
    }
}
