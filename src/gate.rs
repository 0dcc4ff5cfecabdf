//! Request gate for sensitive actions.
//!
//! Every sensitive operation (sign-in, sign-up, sign-out, CSRF issuance) runs
//! through [`RequestGate::run`], which applies the checks in a fixed order:
//!
//! ```text
//! START → RATE_CHECK ─┬─ rejected ───────────────→ 429 {error, resetTime}
//!                     └─ ok → CSRF_CHECK ─┬─ bad ─→ 403 {error}
//!                                         └─ ok → EXECUTE ─┬─ SUCCESS
//!                                                          └─ FAILURE
//! ```
//!
//! A rejected request never reaches the next stage: a rate-limited request
//! is not CSRF-checked, and a request with a bad token never executes.
//! Every outcome is logged with the action label and counted; rejections
//! and authentication failures also go to the audit sink.
//!
//! [`RequestGate::protect`] wraps an operation once and returns a callable
//! that runs it under the gate, so handlers never compose the checks by hand.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::csrf::CsrfCodec;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::rate_limit::{Policy, RateLimitPolicies, RateLimitStatus, RateLimiter};

/// Operations protected by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitiveAction {
    SignIn,
    SignUp,
    SignOut,
    IssueCsrf,
}

impl SensitiveAction {
    /// Label used in logs, metrics and as the rate-limit identifier.
    pub fn label(self) -> &'static str {
        match self {
            Self::SignIn => "sign-in",
            Self::SignUp => "sign-up",
            Self::SignOut => "sign-out",
            Self::IssueCsrf => "csrf",
        }
    }

    pub fn policy(self) -> Policy {
        match self {
            Self::SignIn => Policy::SignIn,
            Self::SignUp => Policy::SignUp,
            Self::SignOut => Policy::GeneralAuth,
            Self::IssueCsrf => Policy::Csrf,
        }
    }

    /// Token issuance is the only action that cannot demand a token.
    pub fn requires_csrf(self) -> bool {
        !matches!(self, Self::IssueCsrf)
    }
}

/// What the gate needs to know about an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateRequest {
    pub client_ip: String,
    /// Token submitted in the form body
    pub submitted_csrf: Option<String>,
    /// Token held in the CSRF cookie
    pub cookie_csrf: Option<String>,
}

impl GateRequest {
    pub fn new(client_ip: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            ..Self::default()
        }
    }

    pub fn with_csrf(mut self, submitted: Option<String>, cookie: Option<String>) -> Self {
        self.submitted_csrf = submitted.filter(|t| !t.is_empty());
        self.cookie_csrf = cookie.filter(|t| !t.is_empty());
        self
    }
}

/// Applies rate limiting and CSRF checks ahead of sensitive operations.
#[derive(Clone)]
pub struct RequestGate {
    limiter: RateLimiter,
    policies: Arc<RateLimitPolicies>,
    csrf: CsrfCodec,
    audit: AuditSink,
}

impl RequestGate {
    pub fn new(
        limiter: RateLimiter,
        policies: RateLimitPolicies,
        csrf: CsrfCodec,
        audit: AuditSink,
    ) -> Self {
        Self {
            limiter,
            policies: Arc::new(policies),
            csrf,
            audit,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    pub fn csrf(&self) -> &CsrfCodec {
        &self.csrf
    }

    /// Run `op` for `action` if the request passes every check.
    ///
    /// # Errors
    ///
    /// - `AppError::RateLimited` when the action's policy is exhausted
    /// - `AppError::CsrfInvalid` when a required token is missing or bad
    /// - whatever `op` returns
    pub async fn run<T, F, Fut>(&self, action: SensitiveAction, req: &GateRequest, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let label = action.label();
        debug!(action = label, client_ip = %req.client_ip, "Gate start");

        let rule = self.policies.get(action.policy());
        let decision = self.limiter.check_limit(rule, &req.client_ip, label).await;
        if let Err(e) = decision.into_result() {
            metrics::record_gate_outcome(label, "rate_limited");
            self.audit.emit(
                AuditEvent::new(AuditKind::RateLimited, label, req.client_ip.clone())
                    .with_detail(format!("policy {}", rule.name)),
            );
            return Err(e);
        }

        if action.requires_csrf()
            && !self
                .csrf
                .verify_submission(req.submitted_csrf.as_deref(), req.cookie_csrf.as_deref())
        {
            warn!(
                action = label,
                client_ip = %req.client_ip,
                submitted = req.submitted_csrf.is_some(),
                cookie = req.cookie_csrf.is_some(),
                "CSRF validation failed"
            );
            metrics::record_gate_outcome(label, "csrf_rejected");
            self.audit
                .emit(AuditEvent::new(AuditKind::CsrfRejected, label, req.client_ip.clone()));
            return Err(AppError::CsrfInvalid);
        }

        match op().await {
            Ok(value) => {
                info!(action = label, client_ip = %req.client_ip, "Action completed");
                metrics::record_gate_outcome(label, "success");
                Ok(value)
            }
            Err(e) => {
                if e.is_expected() {
                    warn!(action = label, client_ip = %req.client_ip, error = %e, "Action failed");
                } else {
                    tracing::error!(action = label, client_ip = %req.client_ip, error = %e, "Action failed");
                }
                if matches!(e, AppError::InvalidCredentials) {
                    self.audit
                        .emit(AuditEvent::new(AuditKind::AuthFailed, label, req.client_ip.clone()));
                }
                metrics::record_gate_outcome(label, "failure");
                Err(e)
            }
        }
    }

    /// Remaining quota for `action` from `client_ip`, without consuming any.
    pub async fn status(&self, action: SensitiveAction, client_ip: &str) -> RateLimitStatus {
        let rule = self.policies.get(action.policy());
        self.limiter.status(rule, client_ip, action.label()).await
    }

    /// Wrap `op` so every call runs under the gate for `action`.
    pub fn protect<F>(&self, action: SensitiveAction, op: F) -> Protected<F> {
        Protected {
            gate: self.clone(),
            action,
            op,
        }
    }
}

/// An operation bound to a gate and an action. See [`RequestGate::protect`].
#[derive(Clone)]
pub struct Protected<F> {
    gate: RequestGate,
    action: SensitiveAction,
    op: F,
}

impl<F> Protected<F> {
    pub fn action(&self) -> SensitiveAction {
        self.action
    }

    /// Run the wrapped operation with `input` if `req` passes the gate.
    pub async fn call<I, T, Fut>(&self, req: &GateRequest, input: I) -> AppResult<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.gate.run(self.action, req, || (self.op)(input)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitRule;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn gate_with(policies: RateLimitPolicies) -> RequestGate {
        let csrf = CsrfCodec::new(b"gate-test-secret-gate-test-secret!", Duration::from_secs(3600), false)
            .unwrap();
        RequestGate::new(
            RateLimiter::new(Arc::new(MemoryStore::new())),
            policies,
            csrf,
            AuditSink::disabled(),
        )
    }

    fn gate() -> RequestGate {
        gate_with(RateLimitPolicies::default())
    }

    fn valid_request(gate: &RequestGate, ip: &str) -> GateRequest {
        let token = gate.csrf().issue().to_string();
        GateRequest::new(ip).with_csrf(Some(token.clone()), Some(token))
    }

    #[test]
    fn test_action_table() {
        assert_eq!(SensitiveAction::SignIn.policy(), Policy::SignIn);
        assert_eq!(SensitiveAction::SignUp.policy(), Policy::SignUp);
        assert_eq!(SensitiveAction::SignOut.policy(), Policy::GeneralAuth);
        assert_eq!(SensitiveAction::IssueCsrf.policy(), Policy::Csrf);
        assert!(SensitiveAction::SignOut.requires_csrf());
        assert!(!SensitiveAction::IssueCsrf.requires_csrf());
    }

    #[tokio::test]
    async fn test_valid_request_executes() {
        let gate = gate();
        let req = valid_request(&gate, "1.2.3.4");
        let result = gate.run(SensitiveAction::SignIn, &req, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_missing_csrf_never_executes() {
        let gate = gate();
        let executed = AtomicUsize::new(0);
        let req = GateRequest::new("1.2.3.4");

        let result = gate
            .run(SensitiveAction::SignUp, &req, || async {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::CsrfInvalid)));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mismatched_csrf_rejected() {
        let gate = gate();
        let a = gate.csrf().issue().to_string();
        let b = gate.csrf().issue().to_string();
        let req = GateRequest::new("1.2.3.4").with_csrf(Some(a), Some(b));

        let result = gate.run(SensitiveAction::SignOut, &req, || async { Ok(()) }).await;
        assert!(matches!(result, Err(AppError::CsrfInvalid)));
    }

    #[tokio::test]
    async fn test_rate_limit_checked_before_csrf() {
        let mut policies = RateLimitPolicies::default();
        policies.sign_in = RateLimitRule::new("sign-in", 1, Duration::from_secs(60), "Too many");
        let gate = gate_with(policies);

        // Bad CSRF still consumes quota, then the rate limit wins.
        let bad = GateRequest::new("9.9.9.9");
        let first = gate.run(SensitiveAction::SignIn, &bad, || async { Ok(()) }).await;
        assert!(matches!(first, Err(AppError::CsrfInvalid)));

        let second = gate.run(SensitiveAction::SignIn, &bad, || async { Ok(()) }).await;
        assert!(matches!(second, Err(AppError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_sixth_sign_in_from_same_ip_is_limited() {
        let gate = gate();
        let req = valid_request(&gate, "1.2.3.4");

        for _ in 0..5 {
            gate.run(SensitiveAction::SignIn, &req, || async { Ok(()) })
                .await
                .unwrap();
        }
        let sixth = gate.run(SensitiveAction::SignIn, &req, || async { Ok(()) }).await;
        match sixth {
            Err(AppError::RateLimited { status, .. }) => {
                assert_eq!(status, axum::http::StatusCode::TOO_MANY_REQUESTS);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        // A different client is unaffected.
        let other = valid_request(&gate, "5.6.7.8");
        assert!(gate.run(SensitiveAction::SignIn, &other, || async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_csrf_issuance_skips_token_check() {
        let gate = gate();
        let req = GateRequest::new("1.2.3.4");
        let result = gate.run(SensitiveAction::IssueCsrf, &req, || async { Ok("token") }).await;
        assert_eq!(result.unwrap(), "token");
    }

    #[tokio::test]
    async fn test_operation_error_is_propagated() {
        let gate = gate();
        let req = valid_request(&gate, "1.2.3.4");
        let result: AppResult<()> = gate
            .run(SensitiveAction::SignIn, &req, || async { Err(AppError::InvalidCredentials) })
            .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_protect_reuses_wrapped_operation() {
        let gate = gate();
        let double = gate.protect(SensitiveAction::SignUp, |n: u32| async move { Ok(n * 2) });
        assert_eq!(double.action(), SensitiveAction::SignUp);

        let req = valid_request(&gate, "1.2.3.4");
        assert_eq!(double.call(&req, 2).await.unwrap(), 4);
        assert_eq!(double.call(&req, 5).await.unwrap(), 10);
        assert_eq!(double.call(&req, 7).await.unwrap(), 14);

        // Sign-up allows three per hour.
        assert!(matches!(double.call(&req, 1).await, Err(AppError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_status_tracks_the_gate_key() {
        let gate = gate();
        let req = valid_request(&gate, "1.2.3.4");

        assert_eq!(gate.status(SensitiveAction::SignOut, "1.2.3.4").await.remaining, 10);
        gate.run(SensitiveAction::SignOut, &req, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(gate.status(SensitiveAction::SignOut, "1.2.3.4").await.remaining, 9);
        assert_eq!(gate.status(SensitiveAction::SignOut, "5.6.7.8").await.remaining, 10);
    }
}
