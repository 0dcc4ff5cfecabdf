//! Sliding-window rate limiting against the shared store.
//!
//! # Algorithm
//!
//! Each key holds an exact log of accepted request instants. A check prunes
//! entries older than the window, counts what remains, and records the new
//! request only if the count is below the limit. The store performs the
//! three steps atomically, so the limit holds across server processes:
//! accepted requests within any trailing window never exceed `max_requests`.
//!
//! # Keys
//!
//! ```text
//! ratelimit:<policy>:<client identity>:<identifier>
//! ```
//!
//! Policies are independent windows; the same client is tracked separately
//! per policy and identifier.
//!
//! # Store Failures
//!
//! The limiter **fails open**: when the store errors or times out the request
//! is allowed and the failure is logged and counted. Availability wins over
//! strict enforcement while the dependency is down.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::metrics;
use crate::store::RateLimitStore;

/// One named rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    /// Stable policy name, part of the store key (e.g. "sign-in")
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u32,
    /// Human-readable message returned when the limit is hit
    pub message: String,
    pub status_code: StatusCode,
}

impl RateLimitRule {
    pub fn new(name: &'static str, max_requests: u32, window: Duration, message: &str) -> Self {
        Self {
            name,
            window,
            max_requests,
            message: message.to_string(),
            status_code: StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Named policies used by the request gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    SignIn,
    SignUp,
    GeneralAuth,
    Csrf,
}

/// The rate limit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicies {
    pub sign_in: RateLimitRule,
    pub sign_up: RateLimitRule,
    pub general_auth: RateLimitRule,
    pub csrf: RateLimitRule,
}

impl RateLimitPolicies {
    pub fn get(&self, policy: Policy) -> &RateLimitRule {
        match policy {
            Policy::SignIn => &self.sign_in,
            Policy::SignUp => &self.sign_up,
            Policy::GeneralAuth => &self.general_auth,
            Policy::Csrf => &self.csrf,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateLimitRule> {
        [&self.sign_in, &self.sign_up, &self.general_auth, &self.csrf].into_iter()
    }
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        Self {
            sign_in: RateLimitRule::new(
                "sign-in",
                5,
                Duration::from_secs(15 * 60),
                "Too many sign-in attempts. Please try again later.",
            ),
            sign_up: RateLimitRule::new(
                "sign-up",
                3,
                Duration::from_secs(60 * 60),
                "Too many sign-up attempts. Please try again later.",
            ),
            general_auth: RateLimitRule::new(
                "general-auth",
                10,
                Duration::from_secs(15 * 60),
                "Too many requests. Please try again later.",
            ),
            csrf: RateLimitRule::new(
                "csrf",
                20,
                Duration::from_secs(15 * 60),
                "Too many token requests. Please try again later.",
            ),
        }
    }
}

/// Outcome of [`RateLimiter::check_limit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub status_code: Option<StatusCode>,
}

impl RateLimitDecision {
    fn allowed(remaining: Option<u32>, reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            remaining,
            reset_at,
            message: None,
            status_code: None,
        }
    }

    /// Convert a rejection into the user-facing error.
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.success {
            return Ok(self);
        }
        Err(AppError::RateLimited {
            message: self
                .message
                .unwrap_or_else(|| "Too many requests".to_string()),
            reset_at: self.reset_at.unwrap_or_else(Utc::now),
            status: self.status_code.unwrap_or(StatusCode::TOO_MANY_REQUESTS),
        })
    }
}

/// Read-only view of a window, for the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub limit: u32,
    pub window_ms: u64,
}

/// Sliding-window rate limiter over a shared [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            enabled: true,
        }
    }

    /// A limiter that allows everything (`RATE_LIMIT_ENABLED=false`).
    pub fn disabled(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Store key for a policy, client and identifier.
    pub fn window_key(rule: &RateLimitRule, client: &str, identifier: &str) -> String {
        format!("ratelimit:{}:{client}:{identifier}", rule.name)
    }

    /// Record a request and decide whether it is within the limit.
    pub async fn check_limit(
        &self,
        rule: &RateLimitRule,
        client: &str,
        identifier: &str,
    ) -> RateLimitDecision {
        self.check_limit_at(rule, client, identifier, Utc::now()).await
    }

    pub async fn check_limit_at(
        &self,
        rule: &RateLimitRule,
        client: &str,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::allowed(None, None);
        }

        let key = Self::window_key(rule, client, identifier);
        let now_ms = now.timestamp_millis();

        let state = match self
            .store
            .hit(&key, now_ms, rule.window, rule.max_requests)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!(
                    policy = rule.name,
                    client_ip = %client,
                    identifier,
                    error = %e,
                    "Rate limit store unavailable, allowing request"
                );
                metrics::record_rate_limit_store_failure(rule.name);
                return RateLimitDecision::allowed(None, None);
            }
        };

        metrics::record_rate_limit_decision(rule.name, state.allowed);
        let reset_at = reset_time(state.oldest_ms.unwrap_or(now_ms), rule.window, now);

        if state.allowed {
            let remaining = rule.max_requests.saturating_sub(state.count);
            debug!(policy = rule.name, client_ip = %client, identifier, remaining, "Rate limit check passed");
            return RateLimitDecision::allowed(Some(remaining), Some(reset_at));
        }

        warn!(
            policy = rule.name,
            client_ip = %client,
            identifier,
            limit = rule.max_requests,
            window_ms = rule.window_ms(),
            reset_time = %reset_at,
            "Rate limit exceeded"
        );

        RateLimitDecision {
            success: false,
            remaining: Some(0),
            reset_at: Some(reset_at),
            message: Some(rule.message.clone()),
            status_code: Some(rule.status_code),
        }
    }

    /// Inspect a window without consuming quota.
    ///
    /// On store failure the full quota is reported, matching the fail-open policy.
    pub async fn status(
        &self,
        rule: &RateLimitRule,
        client: &str,
        identifier: &str,
    ) -> RateLimitStatus {
        self.status_at(rule, client, identifier, Utc::now()).await
    }

    pub async fn status_at(
        &self,
        rule: &RateLimitRule,
        client: &str,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        let now_ms = now.timestamp_millis();
        let key = Self::window_key(rule, client, identifier);

        let (count, oldest_ms) = if self.enabled {
            match self.store.peek(&key, now_ms, rule.window).await {
                Ok(state) => (state.count, state.oldest_ms),
                Err(e) => {
                    error!(policy = rule.name, error = %e, "Rate limit store unavailable during status check");
                    metrics::record_rate_limit_store_failure(rule.name);
                    (0, None)
                }
            }
        } else {
            (0, None)
        };

        RateLimitStatus {
            remaining: rule.max_requests.saturating_sub(count),
            reset_time: reset_time(oldest_ms.unwrap_or(now_ms), rule.window, now),
            limit: rule.max_requests,
            window_ms: rule.window_ms(),
        }
    }
}

/// The instant the oldest entry leaves the window.
fn reset_time(oldest_ms: i64, window: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    DateTime::from_timestamp_millis(oldest_ms.saturating_add(window_ms))
        .unwrap_or_else(|| now + window)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, WindowState};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn hit(&self, _: &str, _: i64, _: Duration, _: u32) -> Result<WindowState, StoreError> {
            Err(StoreError::Timeout("unreachable".to_string()))
        }

        async fn peek(&self, _: &str, _: i64, _: Duration) -> Result<WindowState, StoreError> {
            Err(StoreError::Timeout("unreachable".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Timeout("unreachable".to_string()))
        }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()))
    }

    fn rule(max: u32, window_secs: u64) -> RateLimitRule {
        RateLimitRule::new("test", max, Duration::from_secs(window_secs), "Slow down")
    }

    #[tokio::test]
    async fn test_n_requests_pass_then_rejected() {
        let limiter = limiter();
        let rule = rule(3, 60);
        let now = Utc::now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_limit_at(&rule, "10.0.0.1", "login", now).await;
            assert!(decision.success);
            assert_eq!(decision.remaining, Some(expected_remaining));
        }

        let decision = limiter
            .check_limit_at(&rule, "10.0.0.1", "login", now + ChronoDuration::seconds(1))
            .await;
        assert!(!decision.success);
        assert_eq!(decision.message.as_deref(), Some("Slow down"));
        assert_eq!(decision.status_code, Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(decision.reset_at.unwrap() > now + ChronoDuration::seconds(1));
    }

    #[tokio::test]
    async fn test_quota_returns_after_reset() {
        let limiter = limiter();
        let rule = rule(2, 60);
        let now = Utc::now();

        limiter.check_limit_at(&rule, "c", "id", now).await;
        limiter.check_limit_at(&rule, "c", "id", now).await;
        let rejected = limiter.check_limit_at(&rule, "c", "id", now).await;
        assert!(!rejected.success);

        let after = rejected.reset_at.unwrap() + ChronoDuration::milliseconds(1);
        for _ in 0..2 {
            assert!(limiter.check_limit_at(&rule, "c", "id", after).await.success);
        }
        assert!(!limiter.check_limit_at(&rule, "c", "id", after).await.success);
    }

    #[tokio::test]
    async fn test_window_slides_rather_than_resetting() {
        let limiter = limiter();
        let rule = rule(2, 60);
        let t0 = Utc::now();

        assert!(limiter.check_limit_at(&rule, "c", "id", t0).await.success);
        let t1 = t0 + ChronoDuration::seconds(30);
        assert!(limiter.check_limit_at(&rule, "c", "id", t1).await.success);

        // First entry has left the window, second has not.
        let t2 = t0 + ChronoDuration::seconds(61);
        assert!(limiter.check_limit_at(&rule, "c", "id", t2).await.success);
        assert!(!limiter.check_limit_at(&rule, "c", "id", t2).await.success);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = limiter();
        let rule = rule(1, 60);

        assert!(limiter.check_limit(&rule, "c", "sign-in").await.success);
        assert!(!limiter.check_limit(&rule, "c", "sign-in").await.success);
        assert!(limiter.check_limit(&rule, "c", "sign-up").await.success);
    }

    #[tokio::test]
    async fn test_policies_are_independent() {
        let limiter = limiter();
        let policies = RateLimitPolicies::default();
        let sign_up = policies.get(Policy::SignUp);
        let csrf = policies.get(Policy::Csrf);

        for _ in 0..sign_up.max_requests {
            assert!(limiter.check_limit(sign_up, "c", "auth").await.success);
        }
        assert!(!limiter.check_limit(sign_up, "c", "auth").await.success);
        assert!(limiter.check_limit(csrf, "c", "auth").await.success);
    }

    #[tokio::test]
    async fn test_sign_in_scenario_for_single_ip() {
        let limiter = limiter();
        let policies = RateLimitPolicies::default();
        let now = Utc::now();

        for i in 0..5 {
            let at = now + ChronoDuration::minutes(i);
            assert!(limiter.check_limit_at(&policies.sign_in, "1.2.3.4", "sign-in", at).await.success);
        }

        let sixth = limiter
            .check_limit_at(&policies.sign_in, "1.2.3.4", "sign-in", now + ChronoDuration::minutes(14))
            .await;
        assert!(!sixth.success);
        assert_eq!(sixth.status_code, Some(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(FailingStore));
        let decision = limiter.check_limit(&rule(1, 60), "c", "id").await;

        assert!(decision.success);
        assert!(decision.message.is_none());

        let status = limiter.status(&rule(4, 60), "c", "id").await;
        assert_eq!(status.remaining, 4);
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let limiter = RateLimiter::disabled(Arc::new(MemoryStore::new()));
        let rule = rule(1, 60);
        for _ in 0..10 {
            assert!(limiter.check_limit(&rule, "c", "id").await.success);
        }
    }

    #[tokio::test]
    async fn test_status_does_not_consume() {
        let limiter = limiter();
        let rule = rule(5, 60);
        let now = Utc::now();

        limiter.check_limit_at(&rule, "c", "id", now).await;
        for _ in 0..3 {
            let status = limiter.status_at(&rule, "c", "id", now).await;
            assert_eq!(status.remaining, 4);
            assert_eq!(status.limit, 5);
            assert_eq!(status.window_ms, 60_000);
        }
    }

    #[test]
    fn test_into_result_maps_rejection() {
        let reset = Utc::now();
        let decision = RateLimitDecision {
            success: false,
            remaining: Some(0),
            reset_at: Some(reset),
            message: Some("nope".to_string()),
            status_code: Some(StatusCode::TOO_MANY_REQUESTS),
        };
        match decision.into_result() {
            Err(AppError::RateLimited { message, reset_at, .. }) => {
                assert_eq!(message, "nope");
                assert_eq!(reset_at, reset);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_window_key_layout() {
        let key = RateLimiter::window_key(&rule(1, 1), "1.2.3.4", "sign-in");
        assert_eq!(key, "ratelimit:test:1.2.3.4:sign-in");
    }
}
