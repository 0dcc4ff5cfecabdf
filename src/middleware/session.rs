//! Session guard middleware for protected pages.
//!
//! # Flow
//!
//! For every request whose path matches a protected pattern:
//!
//! 1. Read the session token from the `session_token` cookie, falling back
//!    to `Authorization: Bearer <token>`. None → redirect to sign-in.
//! 2. Look the token up in the revocation blacklist. Revoked → redirect.
//! 3. Verify signature and expiry. Invalid → redirect.
//! 4. Insert [`AuthenticatedUser`] into request extensions and continue.
//!
//! The blacklist check runs before signature verification, so a signed-out
//! token is refused no matter how valid its signature is.
//!
//! # Failure Semantics
//!
//! A blacklist lookup error **fails closed**: the request is redirected and
//! the error logged. Unprotected paths never touch the store.
//!
//! # Pattern Syntax
//!
//! | Pattern             | Matches                                 |
//! |---------------------|-----------------------------------------|
//! | `/api/session`      | exactly that path                       |
//! | `/dashboard/*`      | `/dashboard` and anything below it      |
//! | `/flights/:id/edit` | `/flights/42/edit`, not `/flights/edit` |
//!
//! Matching is case-sensitive and ignores the query string.
//!
//! Logs carry the path and whether a token was present, never the token.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use axum::response::{IntoResponse, Redirect};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use crate::cookie::read_cookie;
use crate::metrics;
use crate::session::{SESSION_COOKIE_NAME, SessionClaims, SessionCodec, SessionError};
use crate::store::RevocationStore;

/// Identity attached to requests that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub session_id: String,
    /// Unix seconds
    pub expires_at: i64,
}

impl From<SessionClaims> for AuthenticatedUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.sub,
            session_id: claims.jti,
            expires_at: claims.exp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// A single protected route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
    prefix: bool,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern.trim();
        let (body, prefix) = match trimmed.strip_suffix("/*") {
            Some(body) => (body, true),
            None => (trimmed, trimmed == "*"),
        };

        let segments = split_path(body)
            .filter(|s| *s != "*")
            .map(|s| {
                if s.starts_with(':') {
                    Segment::Param
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();

        Self { segments, prefix }
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = split_path(path).collect();

        let length_ok = if self.prefix {
            parts.len() >= self.segments.len()
        } else {
            parts.len() == self.segments.len()
        };
        if !length_ok {
            return false;
        }

        self.segments
            .iter()
            .zip(&parts)
            .all(|(segment, part)| match segment {
                Segment::Literal(lit) => lit == part,
                Segment::Param => !part.is_empty(),
            })
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .filter(|s| !s.is_empty())
}

/// The set of protected route patterns.
#[derive(Debug, Clone, Default)]
pub struct ProtectedRoutes {
    patterns: Arc<Vec<RoutePattern>>,
}

impl ProtectedRoutes {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: Arc::new(
                patterns
                    .into_iter()
                    .map(|p| RoutePattern::parse(p.as_ref()))
                    .collect(),
            ),
        }
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Why the guard refused a request.
#[derive(Debug)]
enum Denial {
    Missing,
    Revoked,
    Invalid(SessionError),
    StoreError,
}

impl Denial {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Revoked => "revoked",
            Self::Invalid(_) => "invalid",
            Self::StoreError => "store_error",
        }
    }
}

/// Session verification layer for protected routes.
#[derive(Clone)]
pub struct SessionGuard {
    routes: ProtectedRoutes,
    codec: SessionCodec,
    revocations: Arc<dyn RevocationStore>,
    sign_in_path: Arc<str>,
}

impl SessionGuard {
    pub fn new(
        routes: ProtectedRoutes,
        codec: SessionCodec,
        revocations: Arc<dyn RevocationStore>,
        sign_in_path: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            routes,
            codec,
            revocations,
            sign_in_path: sign_in_path.into(),
        }
    }

    pub fn routes(&self) -> &ProtectedRoutes {
        &self.routes
    }

    async fn authorize(&self, path: &str, token: Option<&str>) -> Result<AuthenticatedUser, Denial> {
        let Some(token) = token else {
            return Err(Denial::Missing);
        };

        let token_id = SessionCodec::token_id(token);
        match self.revocations.is_revoked(&token_id).await {
            Ok(false) => {}
            Ok(true) => return Err(Denial::Revoked),
            Err(e) => {
                error!(path, error = %e, "Session blacklist lookup failed, denying request");
                return Err(Denial::StoreError);
            }
        }

        self.codec
            .verify(token)
            .map(AuthenticatedUser::from)
            .map_err(Denial::Invalid)
    }
}

impl<S> Layer<S> for SessionGuard {
    type Service = SessionGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionGuardService {
            inner,
            guard: self.clone(),
        }
    }
}

/// Session guard service wrapper.
#[derive(Clone)]
pub struct SessionGuardService<S> {
    inner: S,
    guard: SessionGuard,
}

impl<S> Service<Request<Body>> for SessionGuardService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let guard = self.guard.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            if !guard.routes.is_protected(&path) {
                return inner.call(req).await;
            }

            let token = extract_session_token(req.headers()).map(str::to_string);
            let has_token = token.is_some();

            match guard.authorize(&path, token.as_deref()).await {
                Ok(user) => {
                    debug!(path = %path, "Session verified");
                    metrics::record_session_check("granted");
                    req.extensions_mut().insert(user);
                    inner.call(req).await
                }
                Err(denial) => {
                    match &denial {
                        Denial::Invalid(e) => {
                            warn!(path = %path, has_token, reason = %e, "Session verification failed");
                        }
                        _ => debug!(path = %path, has_token, outcome = denial.outcome(), "Session required"),
                    }
                    metrics::record_session_check(denial.outcome());
                    Ok(Redirect::to(&guard.sign_in_path).into_response())
                }
            }
        })
    }
}

/// Session token from the cookie, or from a bearer `Authorization` header.
pub fn extract_session_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = read_cookie(headers, SESSION_COOKIE_NAME).filter(|t| !t.is_empty()) {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
