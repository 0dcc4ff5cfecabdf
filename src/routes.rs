//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌────────────────────┐
//! │   Request ID       │ ← Sets / propagates X-Request-Id
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │     Tracing        │ ← HTTP request/response logging
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │ Hardening headers  │ ← X-Frame-Options, nosniff, Referrer-Policy,
//! └─────────┬──────────┘   no-store unless the handler chose caching
//!           ▼
//! ┌────────────────────┐
//! │      CORS          │ ← Cross-origin headers
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │  Session Guard     │ ← 303 to sign-in on protected paths
//! └─────────┬──────────┘
//!           ▼
//! ┌────────────────────┐
//! │  Body size limit   │
//! └─────────┬──────────┘
//!           ▼
//!        Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health & monitoring
//! - `/api/csrf`, `/api/rate-limit-status` - Token issuance and quota view
//! - `/auth/sign-in`, `/auth/sign-up`, `/auth/sign-out` - Form actions
//! - `/api/session` - Protected session details

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, header};
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::state::AppState;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/csrf", get(handlers::issue_csrf_token))
        .route("/api/rate-limit-status", get(handlers::rate_limit_status))
        .route("/api/session", get(handlers::current_session))
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/sign-up", post(handlers::sign_up))
        .route("/auth/sign-out", post(handlers::sign_out));

    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    info!(
        patterns = config.protected_routes.len(),
        sign_in_path = %config.sign_in_path,
        "Session guard enabled"
    );

    // Applied bottom to top: the last layer added runs first.
    router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(state.session_guard())
        .layer(cors)
        .layer(map_response(default_no_store))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Responses are uncacheable unless the handler says otherwise.
async fn default_no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    }
    response
}

/// Build CORS layer from configuration.
///
/// # Security Note
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
