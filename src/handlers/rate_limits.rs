//! Rate limit introspection.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use tracing::instrument;

use crate::gate::SensitiveAction;
use crate::models::{RateLimitOverview, RateLimitStatusResponse};
use crate::state::AppState;

/// Remaining quota per policy for the calling client.
///
/// Read-only: looking does not consume quota. Cached publicly for a minute.
///
/// # Response Body
///
/// ```json
/// {
///   "rateLimits": {
///     "signIn": { "remaining": 5, "resetTime": "2025-01-15T10:45:00Z", "limit": 5, "windowMs": 900000 },
///     "signUp": { ... },
///     "generalAuth": { ... },
///     "csrf": { ... }
///   }
/// }
/// ```
#[instrument(skip_all)]
pub async fn rate_limit_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client_ip = state.client_ip.resolve(&headers);
    let gate = &state.gate;

    let (sign_in, sign_up, general_auth, csrf) = tokio::join!(
        gate.status(SensitiveAction::SignIn, &client_ip),
        gate.status(SensitiveAction::SignUp, &client_ip),
        gate.status(SensitiveAction::SignOut, &client_ip),
        gate.status(SensitiveAction::IssueCsrf, &client_ip),
    );

    let mut response = Json(RateLimitStatusResponse {
        rate_limits: RateLimitOverview {
            sign_in,
            sign_up,
            general_auth,
            csrf,
        },
    })
    .into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=60"),
    );
    response
}
