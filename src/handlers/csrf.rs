//! CSRF token endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::instrument;

use super::util::gate_request;
use crate::error::AppResult;
use crate::gate::SensitiveAction;
use crate::models::CsrfTokenResponse;
use crate::state::AppState;

/// Hand out a CSRF token for the double-submit check.
///
/// A valid token already held in the `csrf_token` cookie is returned as is;
/// otherwise a fresh token is minted and the cookie set. Runs under the
/// `csrf` rate limit policy.
///
/// # Response Body
///
/// ```json
/// { "token": "q3V...Zw.1718000000000.dGh...Q" }
/// ```
#[instrument(skip_all)]
pub async fn issue_csrf_token(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let req = gate_request(&state, &headers, None);
    let csrf = state.csrf.clone();

    let issue = state
        .gate
        .run(SensitiveAction::IssueCsrf, &req, || async move {
            Ok(csrf.get_or_issue(&headers))
        })
        .await?;

    let mut response = Json(CsrfTokenResponse { token: issue.token }).into_response();
    if let Some(cookie) = issue.set_cookie {
        cookie.apply(response.headers_mut());
    }
    Ok(response)
}
