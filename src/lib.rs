//! # skygate
//!
//! Request protection for the flight-booking web service: CSRF tokens,
//! signed sessions with server-side revocation, and sliding-window rate
//! limiting shared through Redis.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Headers → Session Guard)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (csrf, rate-limit status, auth forms, session)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestGate (rate limit → CSRF → action) · Accounts        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CsrfCodec · SessionCodec · RateLimiter · AuditSink         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Store (Redis sorted sets + Lua, or in-memory)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skygate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::connect(config).await?;
//!     let app = build_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Production requires both signing secrets and a Redis store:
//! ```bash
//! APP_ENV=production CSRF_SECRET=... SESSION_SECRET=... REDIS_URL=redis://redis:6379 cargo run
//! ```

pub mod accounts;
pub mod audit;
pub mod config;
pub mod cookie;
pub mod csrf;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use gate::{RequestGate, SensitiveAction};
pub use routes::build_router;
pub use state::AppState;
