//! Sign-in, sign-up and sign-out form endpoints.
//!
//! # Endpoints
//!
//! - `POST /auth/sign-in` - Verify credentials, set the session cookie
//! - `POST /auth/sign-up` - Create an account
//! - `POST /auth/sign-out` - Revoke the session token and clear the cookie
//!
//! All three take urlencoded forms carrying a `csrfToken` field that must
//! match the `csrf_token` cookie, and run under the request gate. Success
//! answers `303 See Other` so browsers follow with a GET.

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, info, instrument, warn};

use super::util::gate_request;
use crate::audit::{AuditEvent, AuditKind};
use crate::cookie::SetCookie;
use crate::error::AppResult;
use crate::gate::SensitiveAction;
use crate::middleware::extract_session_token;
use crate::models::{SignInForm, SignOutForm, SignUpForm};
use crate::session::{SESSION_COOKIE_NAME, SessionCodec};
use crate::state::AppState;

/// Sign in with email and password.
///
/// On success the session cookie is set and the client is redirected to
/// `AFTER_SIGN_IN_PATH`.
#[instrument(skip_all)]
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SignInForm>,
) -> AppResult<Response> {
    let req = gate_request(&state, &headers, form.csrf_token.clone());
    let accounts = state.accounts.clone();
    let sessions = state.sessions.clone();

    let session = state
        .gate
        .run(SensitiveAction::SignIn, &req, || async move {
            let account = accounts.authenticate(&form.email, &form.password).await?;
            sessions.issue(&account.id)
        })
        .await?;

    info!(user_id = %session.claims.sub, "User signed in");

    let mut response = Redirect::to(&state.config.after_sign_in_path).into_response();
    SetCookie::new(SESSION_COOKIE_NAME, session.token)
        .max_age(state.sessions.ttl())
        .secure(state.config.secure_cookies())
        .apply(response.headers_mut());
    Ok(response)
}

/// Create an account, then send the user to the sign-in page.
#[instrument(skip_all)]
pub async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SignUpForm>,
) -> AppResult<Response> {
    let req = gate_request(&state, &headers, form.csrf_token.clone());
    let accounts = state.accounts.clone();

    let register = state.gate.protect(SensitiveAction::SignUp, move |form: SignUpForm| {
        let accounts = accounts.clone();
        async move { accounts.register(&form.name, &form.email, &form.password).await }
    });
    register.call(&req, form).await?;

    Ok(Redirect::to(&state.config.sign_in_path).into_response())
}

/// Sign out.
///
/// Always redirects to the sign-in page. When the request passes the gate,
/// the presented session token is blacklisted for the rest of its lifetime
/// and the session cookie is cleared; otherwise the failure is logged and
/// nothing changes. A body that is not a urlencoded form counts as a
/// missing CSRF token.
#[instrument(skip_all)]
pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<SignOutForm>, FormRejection>,
) -> Response {
    let submitted = match form {
        Ok(Form(form)) => form.csrf_token,
        Err(rejection) => {
            warn!(reason = %rejection, "Sign-out body unreadable");
            None
        }
    };
    let req = gate_request(&state, &headers, submitted);
    let token = extract_session_token(&headers).map(str::to_string);
    let sessions = state.sessions.clone();
    let revocations = state.revocations.clone();

    let result = state
        .gate
        .run(SensitiveAction::SignOut, &req, || async move {
            let Some(token) = token else {
                return Ok(None);
            };
            match sessions.verify(&token) {
                Ok(claims) => {
                    revocations
                        .revoke(&SessionCodec::token_id(&token), claims.exp)
                        .await?;
                    Ok(Some(claims.sub))
                }
                Err(e) => {
                    debug!(reason = %e, "Sign-out with unusable session token");
                    Ok(None)
                }
            }
        })
        .await;

    let mut response = Redirect::to(&state.config.sign_in_path).into_response();
    match result {
        Ok(user_id) => {
            if let Some(user_id) = &user_id {
                info!(user_id = %user_id, "User signed out");
            }
            let detail = if user_id.is_some() {
                "session revoked"
            } else {
                "no active session"
            };
            state.audit.emit(
                AuditEvent::new(
                    AuditKind::SignedOut,
                    SensitiveAction::SignOut.label(),
                    req.client_ip.clone(),
                )
                .with_detail(detail),
            );
            SetCookie::expired(SESSION_COOKIE_NAME)
                .secure(state.config.secure_cookies())
                .apply(response.headers_mut());
        }
        Err(e) => warn!(error = %e, "Sign-out rejected"),
    }
    response
}
